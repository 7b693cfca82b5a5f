//! Subcommand handlers for the `permsync` binary.

use anyhow::Result;
use permsync::{
    models::{Subject, permission_sync_job},
    repositories::{
        Admission, CancelSelector, JobOptions, JobWithPlaceInQueue, ListOptions,
        PermissionSyncJobStore, SubjectResolver,
    },
};

pub async fn enqueue(
    store: &PermissionSyncJobStore,
    subject: Subject,
    opts: JobOptions,
) -> Result<()> {
    match store.create_sync_job(subject, opts).await? {
        Admission::Inserted(job) => println!("queued job {} for {subject}", job.id),
        Admission::Preempted {
            canceled_job_id,
            job,
        } => println!(
            "queued job {} for {subject}, replacing lower-priority job {canceled_job_id}",
            job.id
        ),
        Admission::Dropped {
            existing_job_id: Some(id),
        } => println!("dropped: job {id} is already queued for {subject}"),
        Admission::Dropped {
            existing_job_id: None,
        } => println!("dropped: a job is already queued for {subject}"),
    }
    Ok(())
}

pub async fn cancel(
    store: &PermissionSyncJobStore,
    selector: CancelSelector,
    reason: &str,
) -> Result<()> {
    let canceled = store.cancel_queued_job(reason, selector).await?;
    println!("canceled {canceled} job(s)");
    Ok(())
}

pub async fn list(
    store: &PermissionSyncJobStore,
    subjects: &dyn SubjectResolver,
    opts: &ListOptions,
    place_in_queue: bool,
) -> Result<()> {
    let pagination = opts.pagination.clone().unwrap_or_default();

    let rows = if place_in_queue {
        store.list_with_place_in_queue(opts).await?
    } else {
        store
            .list(opts)
            .await?
            .into_iter()
            .map(|job| JobWithPlaceInQueue {
                job,
                place_in_queue: None,
            })
            .collect()
    };

    for row in &rows {
        let mut line = describe(subjects, &row.job).await?;
        if let Some(place) = row.place_in_queue {
            line.push_str(&format!(" place={place}"));
        }
        println!("{line}");
    }

    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        println!("next cursor: {}", pagination.cursor_for(&last.job)?);
        println!("previous cursor: {}", pagination.cursor_for(&first.job)?);
    }
    Ok(())
}

pub async fn count(store: &PermissionSyncJobStore, opts: &ListOptions) -> Result<()> {
    println!("{}", store.count(opts).await?);
    Ok(())
}

pub async fn latest(
    store: &PermissionSyncJobStore,
    subjects: &dyn SubjectResolver,
    opts: &ListOptions,
) -> Result<()> {
    match store.get_latest_finished_sync_job(opts).await? {
        Some(job) => println!("{}", describe(subjects, &job).await?),
        None => println!("no finished job"),
    }
    Ok(())
}

pub async fn failing(store: &PermissionSyncJobStore) -> Result<()> {
    let users = store.count_users_with_failing_sync_job().await?;
    let repos = store.count_repos_with_failing_sync_job().await?;
    println!("users: {users}");
    println!("repos: {repos}");
    Ok(())
}

async fn describe(
    subjects: &dyn SubjectResolver,
    job: &permission_sync_job::Model,
) -> Result<String> {
    let target = match job.subject() {
        Some(subject) => match subjects.display_name(subject).await? {
            Some(name) => format!("{subject} ({name})"),
            None => subject.to_string(),
        },
        None => "-".to_string(),
    };

    let mut line = format!(
        "#{} {} {} {} {} queued_at={}",
        job.id,
        job.state,
        job.priority,
        job.reason,
        target,
        job.queued_at.to_rfc3339()
    );
    if let Some(at) = job.process_after {
        line.push_str(&format!(" process_after={}", at.to_rfc3339()));
    }
    if let Some(at) = job.finished_at {
        line.push_str(&format!(" finished_at={}", at.to_rfc3339()));
    }
    if job.is_partial_success {
        line.push_str(" partial");
    }
    if let Some(reason) = &job.cancellation_reason {
        line.push_str(&format!(" cancel_reason={reason:?}"));
    }
    if let Some(message) = &job.failure_message {
        line.push_str(&format!(" failure={message:?}"));
    }
    Ok(line)
}
