//! Integration tests for admission, cancellation and result recording.

use anyhow::Result;
use permsync::error::RepositoryError;
use permsync::models::{CodeHostState, JobPriority, JobState, Subject, SyncReason, user};
use permsync::repositories::{
    Admission, CancelSelector, JobOptions, ListOptions, PermissionsDelta,
};
use sea_orm::EntityTrait;
use tokio::task::JoinSet;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{insert_repo, insert_user, mark_processing, setup_store, ts};

fn manual(priority: JobPriority) -> JobOptions {
    JobOptions::new(SyncReason::ManualUserSync).priority(priority)
}

#[tokio::test]
async fn immediate_jobs_are_deduplicated_and_preempted_by_priority() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;
    let all_rows = ListOptions {
        user_id: Some(user_id),
        ..Default::default()
    };

    let first = match store.create_user_sync_job(user_id, manual(JobPriority::Low)).await? {
        Admission::Inserted(job) => job,
        other => panic!("expected insert, got {other:?}"),
    };
    assert_eq!(first.state, JobState::Queued);
    assert_eq!(first.user_id, Some(user_id));
    assert_eq!(first.repository_id, None);

    // Equal priority is dropped and points at the existing job.
    let dropped = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?;
    assert_eq!(
        dropped,
        Admission::Dropped {
            existing_job_id: Some(first.id)
        }
    );
    assert_eq!(store.count(&all_rows).await?, 1);

    // Higher priority replaces the queued job.
    let second = match store
        .create_user_sync_job(user_id, manual(JobPriority::Medium))
        .await?
    {
        Admission::Preempted {
            canceled_job_id,
            job,
        } => {
            assert_eq!(canceled_job_id, first.id);
            job
        }
        other => panic!("expected preemption, got {other:?}"),
    };
    assert_eq!(second.priority, JobPriority::Medium);
    assert_eq!(store.count(&all_rows).await?, 2);

    let canceled = store.get_by_id(first.id).await?.expect("first job exists");
    assert_eq!(canceled.state, JobState::Canceled);
    assert!(canceled.cancel);
    assert_eq!(
        canceled.cancellation_reason.as_deref(),
        Some("higher-priority-job")
    );
    assert!(canceled.finished_at.is_some());

    // Lower priority than the queued job is dropped too.
    let dropped = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?;
    assert!(dropped.is_dropped());
    assert!(dropped.job().is_none());
    assert_eq!(store.count(&all_rows).await?, 2);

    let third = store
        .create_user_sync_job(user_id, manual(JobPriority::High))
        .await?;
    assert!(matches!(
        third,
        Admission::Preempted { canceled_job_id, .. } if canceled_job_id == second.id
    ));
    assert_eq!(store.count(&all_rows).await?, 3);

    let queued = store
        .count(&ListOptions {
            user_id: Some(user_id),
            state: Some(JobState::Queued),
            ..Default::default()
        })
        .await?;
    assert_eq!(queued, 1);
    Ok(())
}

#[tokio::test]
async fn delayed_jobs_bypass_deduplication() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;
    let later = ts("2099-01-01T00:00:00Z");

    store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?;
    for _ in 0..2 {
        let admission = store
            .create_user_sync_job(user_id, manual(JobPriority::Low).process_after(later))
            .await?;
        let job = admission.job().expect("delayed job inserted");
        assert_eq!(job.process_after, Some(later));
    }

    // Preemption only considers the immediate job.
    let admission = store
        .create_user_sync_job(user_id, manual(JobPriority::High))
        .await?;
    assert!(matches!(admission, Admission::Preempted { .. }));

    let delayed_queued = store
        .count(&ListOptions {
            user_id: Some(user_id),
            state: Some(JobState::Queued),
            not_null_process_after: true,
            ..Default::default()
        })
        .await?;
    assert_eq!(delayed_queued, 2);
    Ok(())
}

#[tokio::test]
async fn deduplication_is_scoped_to_the_subject() -> Result<()> {
    let (db, store) = setup_store().await?;
    let alice = insert_user(&db, "alice", None).await?;
    let bob = insert_user(&db, "bob", None).await?;
    let repo = insert_repo(&db, "github.com/acme/widgets").await?;

    let opts = JobOptions::new(SyncReason::ManualRepoSync);
    assert!(!store.create_user_sync_job(alice, opts.clone()).await?.is_dropped());
    assert!(!store.create_user_sync_job(bob, opts.clone()).await?.is_dropped());
    assert!(!store.create_repo_sync_job(repo, opts.clone()).await?.is_dropped());
    assert!(store.create_repo_sync_job(repo, opts).await?.is_dropped());

    assert_eq!(store.count(&ListOptions::default()).await?, 3);
    Ok(())
}

#[tokio::test]
async fn job_options_are_persisted() -> Result<()> {
    let (db, store) = setup_store().await?;
    let admin = insert_user(&db, "admin", None).await?;
    let repo = insert_repo(&db, "github.com/acme/widgets").await?;

    let admission = store
        .create_repo_sync_job(
            repo,
            JobOptions::new(SyncReason::ManualRepoSync)
                .priority(JobPriority::High)
                .invalidate_caches()
                .no_perms()
                .triggered_by(admin),
        )
        .await?;
    let job = admission.job().expect("job inserted").clone();

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored, job);
    assert_eq!(stored.subject(), Some(Subject::Repo(repo)));
    assert_eq!(stored.reason, SyncReason::ManualRepoSync);
    assert!(stored.invalidate_caches);
    assert!(stored.no_perms);
    assert_eq!(stored.triggered_by_user_id, Some(admin));
    assert!(!stored.cancel);
    assert!(stored.code_host_states.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_subject_ids_are_rejected() -> Result<()> {
    let (_db, store) = setup_store().await?;

    let err = store
        .create_user_sync_job(0, manual(JobPriority::Low))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(_)));

    let err = store
        .create_repo_sync_job(-3, JobOptions::new(SyncReason::RepoNoPerms))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(_)));

    assert_eq!(store.count(&ListOptions::default()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_subject_fails_with_database_error() -> Result<()> {
    let (_db, store) = setup_store().await?;

    let err = store
        .create_user_sync_job(4242, manual(JobPriority::Low))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Database(_)));
    Ok(())
}

#[tokio::test]
async fn concurrent_admissions_queue_a_single_job() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .create_user_sync_job(user_id, manual(JobPriority::Low))
                .await
        });
    }

    let mut inserted = 0;
    let mut dropped = 0;
    while let Some(result) = tasks.join_next().await {
        match result?? {
            Admission::Inserted(_) => inserted += 1,
            Admission::Dropped { .. } => dropped += 1,
            other => panic!("unexpected admission {other:?}"),
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(dropped, 4);

    let queued = store
        .count(&ListOptions {
            user_id: Some(user_id),
            state: Some(JobState::Queued),
            ..Default::default()
        })
        .await?;
    assert_eq!(queued, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_queued_job_by_id() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;
    let job = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?
        .job()
        .expect("job inserted")
        .clone();

    let canceled = store
        .cancel_queued_job("user deleted", CancelSelector::Job(job.id))
        .await?;
    assert_eq!(canceled, 1);

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Canceled);
    assert!(stored.cancel);
    assert_eq!(stored.cancellation_reason.as_deref(), Some("user deleted"));
    assert!(stored.finished_at.is_some());

    // Nothing left to cancel.
    let err = store
        .cancel_queued_job("again", CancelSelector::Job(job.id))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = store
        .cancel_queued_job("missing", CancelSelector::Job(9999))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // The subject can be queued again.
    let again = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?;
    assert!(matches!(again, Admission::Inserted(_)));
    Ok(())
}

#[tokio::test]
async fn cancel_by_subject_covers_delayed_jobs() -> Result<()> {
    let (db, store) = setup_store().await?;
    let repo = insert_repo(&db, "github.com/acme/widgets").await?;
    let other = insert_repo(&db, "github.com/acme/gadgets").await?;
    let opts = JobOptions::new(SyncReason::RepoOutdatedPerms);

    store.create_repo_sync_job(repo, opts.clone()).await?;
    store
        .create_repo_sync_job(repo, opts.clone().process_after(ts("2099-01-01T00:00:00Z")))
        .await?;
    store.create_repo_sync_job(other, opts).await?;

    let canceled = store
        .cancel_queued_job("repo deleted", CancelSelector::Subject(Subject::Repo(repo)))
        .await?;
    assert_eq!(canceled, 2);

    let remaining = store
        .count(&ListOptions {
            state: Some(JobState::Queued),
            ..Default::default()
        })
        .await?;
    assert_eq!(remaining, 1);
    Ok(())
}

#[tokio::test]
async fn processing_jobs_are_not_canceled() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;
    let job = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?
        .job()
        .expect("job inserted")
        .clone();
    mark_processing(&db, job.id).await?;

    let err = store
        .cancel_queued_job("too late", CancelSelector::Job(job.id))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Processing);
    assert!(!stored.cancel);

    // A processing job does not block a new immediate request.
    let next = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?;
    assert!(matches!(next, Admission::Inserted(_)));
    Ok(())
}

#[tokio::test]
async fn save_sync_result_records_partial_success() -> Result<()> {
    let (db, store) = setup_store().await?;
    let repo = insert_repo(&db, "github.com/acme/widgets").await?;
    let job = store
        .create_repo_sync_job(repo, JobOptions::new(SyncReason::GitHubRepoEvent))
        .await?
        .job()
        .expect("job inserted")
        .clone();
    mark_processing(&db, job.id).await?;

    store
        .save_sync_result(
            job.id,
            true,
            Some(PermissionsDelta {
                added: 3,
                removed: 1,
                found: 12,
            }),
            vec![
                CodeHostState::success("1", "github", "fetched 12 users"),
                CodeHostState::error("2", "gitlab", "rate limited"),
            ],
        )
        .await?;

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.permissions_added, 3);
    assert_eq!(stored.permissions_removed, 1);
    assert_eq!(stored.permissions_found, 12);
    assert!(stored.is_partial_success);
    assert_eq!(stored.failure_message, None);
    assert!(stored.finished_at.is_some());
    assert_eq!(stored.code_host_states.len(), 2);
    assert_eq!(stored.code_host_states.0[1].message, "rate limited");
    Ok(())
}

#[tokio::test]
async fn save_sync_result_records_failure() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;
    let job = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?
        .job()
        .expect("job inserted")
        .clone();
    mark_processing(&db, job.id).await?;

    store
        .save_sync_result(
            job.id,
            false,
            None,
            vec![
                CodeHostState::error("1", "github", "bad credentials"),
                CodeHostState::error("2", "gitlab", "timeout"),
            ],
        )
        .await?;

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.failure_message.as_deref(), Some("bad credentials"));
    assert!(!stored.is_partial_success);
    assert_eq!(stored.permissions_added, 0);
    assert_eq!(stored.permissions_found, 0);
    Ok(())
}

#[tokio::test]
async fn save_sync_result_rejects_missing_queued_and_finished_jobs() -> Result<()> {
    let (db, store) = setup_store().await?;
    let user_id = insert_user(&db, "alice", None).await?;

    let err = store
        .save_sync_result(777, true, None, Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let job = store
        .create_user_sync_job(user_id, manual(JobPriority::Low))
        .await?
        .job()
        .expect("job inserted")
        .clone();

    // A job that was never claimed cannot be completed.
    let err = store
        .save_sync_result(job.id, true, None, Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Queued);
    assert_eq!(stored.finished_at, None);

    mark_processing(&db, job.id).await?;
    store.save_sync_result(job.id, true, None, Vec::new()).await?;

    let err = store
        .save_sync_result(job.id, false, None, Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let stored = store.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(stored.state, JobState::Completed);
    assert!(!stored.is_partial_success);
    Ok(())
}

#[tokio::test]
async fn deleting_a_subject_removes_its_jobs() -> Result<()> {
    let (db, store) = setup_store().await?;
    let alice = insert_user(&db, "alice", None).await?;
    let bob = insert_user(&db, "bob", None).await?;

    store.create_user_sync_job(alice, manual(JobPriority::Low)).await?;
    store.create_user_sync_job(bob, manual(JobPriority::Low)).await?;

    user::Entity::delete_by_id(alice).exec(&db).await?;

    let all = store.list(&ListOptions::default()).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].user_id, Some(bob));
    Ok(())
}
