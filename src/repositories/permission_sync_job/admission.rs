//! Admission of new permission sync jobs.
//!
//! Immediate jobs are deduplicated per subject: at most one queued immediate
//! job may exist for a user or repository, and a new request either replaces
//! it (strictly higher priority) or is dropped. Delayed jobs bypass this.

use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use tracing::{debug, info, warn};

use super::{
    CANCELLATION_REASON_HIGHER_PRIORITY, JobOptions, PermissionSyncJobStore, cancel_queued,
    map_db_err, now,
};
use crate::error::RepositoryError;
use crate::models::permission_sync_job::{ActiveModel, Column, Entity, Model};
use crate::models::{CodeHostStates, JobPriority, JobState, Subject};

/// Outcome of an admission request. None of these is an error.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
    /// A new job was queued.
    Inserted(Model),
    /// A lower-priority queued job was canceled and replaced.
    Preempted { canceled_job_id: i32, job: Model },
    /// An equal or higher priority job is already queued; nothing was written.
    /// The id is unknown when the request lost repeated uniqueness races.
    Dropped { existing_job_id: Option<i32> },
}

impl Admission {
    /// The job written by this admission, if any.
    pub fn job(&self) -> Option<&Model> {
        match self {
            Self::Inserted(job) | Self::Preempted { job, .. } => Some(job),
            Self::Dropped { .. } => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Insert,
    Preempt,
    Drop,
}

/// Dedup rule for immediate jobs, given the priority of the queued immediate
/// job for the same subject (if any).
pub(crate) fn decide(existing: Option<JobPriority>, requested: JobPriority) -> Decision {
    match existing {
        None => Decision::Insert,
        Some(current) if current < requested => Decision::Preempt,
        Some(_) => Decision::Drop,
    }
}

impl PermissionSyncJobStore {
    /// Request a permission sync for a user.
    pub async fn create_user_sync_job(
        &self,
        user_id: i32,
        opts: JobOptions,
    ) -> Result<Admission, RepositoryError> {
        self.create_sync_job(Subject::User(user_id), opts).await
    }

    /// Request a permission sync for a repository.
    pub async fn create_repo_sync_job(
        &self,
        repo_id: i32,
        opts: JobOptions,
    ) -> Result<Admission, RepositoryError> {
        self.create_sync_job(Subject::Repo(repo_id), opts).await
    }

    pub async fn create_sync_job(
        &self,
        subject: Subject,
        opts: JobOptions,
    ) -> Result<Admission, RepositoryError> {
        if subject.id() <= 0 {
            return Err(RepositoryError::validation(format!(
                "invalid subject id {}",
                subject.id()
            )));
        }

        let metric_labels = vec![("subject_type", subject.kind().to_string())];

        if opts.process_after.is_some() {
            let job = insert_job(&self.db, subject, &opts).await?;
            info!(
                job_id = job.id,
                subject = %subject,
                reason = %opts.reason,
                priority = %opts.priority,
                "Queued delayed permission sync job"
            );
            counter!("permission_sync_jobs_created_total", &metric_labels).increment(1);
            return Ok(Admission::Inserted(job));
        }

        let mut conflicts = 0;
        loop {
            match self.admit_immediate(subject, &opts).await {
                Err(err) if err.is_unique_violation() && conflicts < self.conflict_retries => {
                    conflicts += 1;
                    debug!(
                        subject = %subject,
                        attempt = conflicts,
                        "Concurrent admission for subject; re-evaluating"
                    );
                }
                Err(err) if err.is_unique_violation() => {
                    warn!(
                        subject = %subject,
                        conflicts,
                        "Gave up admitting permission sync job after repeated conflicts"
                    );
                    counter!("permission_sync_jobs_dropped_total", &metric_labels).increment(1);
                    return Ok(Admission::Dropped {
                        existing_job_id: None,
                    });
                }
                Err(err) => return Err(err),
                Ok(admission) => {
                    match &admission {
                        Admission::Inserted(_) => {
                            counter!("permission_sync_jobs_created_total", &metric_labels)
                                .increment(1);
                        }
                        Admission::Preempted { .. } => {
                            counter!("permission_sync_jobs_created_total", &metric_labels)
                                .increment(1);
                            counter!("permission_sync_jobs_preempted_total", &metric_labels)
                                .increment(1);
                        }
                        Admission::Dropped { .. } => {
                            counter!("permission_sync_jobs_dropped_total", &metric_labels)
                                .increment(1);
                        }
                    }
                    return Ok(admission);
                }
            }
        }
    }

    /// One read-then-act pass over the subject's queued immediate job.
    async fn admit_immediate(
        &self,
        subject: Subject,
        opts: &JobOptions,
    ) -> Result<Admission, RepositoryError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("failed to start admission transaction", err))?;

        let existing = Entity::find()
            .filter(subject.column().eq(subject.id()))
            .filter(Column::State.eq(JobState::Queued))
            .filter(Column::ProcessAfter.is_null())
            .filter(Column::Cancel.eq(false))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|err| map_db_err("failed to load queued permission sync job", err))?;

        let decision = decide(existing.as_ref().map(|job| job.priority), opts.priority);
        let admission = match (decision, existing) {
            (Decision::Drop, Some(existing)) => {
                txn.rollback()
                    .await
                    .map_err(|err| map_db_err("failed to rollback admission transaction", err))?;
                debug!(
                    subject = %subject,
                    existing_job_id = existing.id,
                    existing_priority = %existing.priority,
                    requested_priority = %opts.priority,
                    "Permission sync job with equal or higher priority already queued; dropping request"
                );
                return Ok(Admission::Dropped {
                    existing_job_id: Some(existing.id),
                });
            }
            (Decision::Preempt, Some(existing)) => {
                // The job may have been claimed since it was read; only the insert matters then.
                cancel_queued(
                    &txn,
                    CANCELLATION_REASON_HIGHER_PRIORITY,
                    sea_orm::Condition::all().add(Column::Id.eq(existing.id)),
                )
                .await?;
                let job = insert_job(&txn, subject, opts).await?;
                info!(
                    job_id = job.id,
                    canceled_job_id = existing.id,
                    subject = %subject,
                    priority = %opts.priority,
                    "Replaced lower-priority queued permission sync job"
                );
                Admission::Preempted {
                    canceled_job_id: existing.id,
                    job,
                }
            }
            _ => {
                let job = insert_job(&txn, subject, opts).await?;
                info!(
                    job_id = job.id,
                    subject = %subject,
                    reason = %opts.reason,
                    priority = %opts.priority,
                    "Queued permission sync job"
                );
                Admission::Inserted(job)
            }
        };

        txn.commit()
            .await
            .map_err(|err| map_db_err("failed to commit admission transaction", err))?;

        Ok(admission)
    }
}

async fn insert_job<C>(conn: &C, subject: Subject, opts: &JobOptions) -> Result<Model, RepositoryError>
where
    C: ConnectionTrait,
{
    let (user_id, repository_id) = match subject {
        Subject::User(id) => (Some(id), None),
        Subject::Repo(id) => (None, Some(id)),
    };

    let job = ActiveModel {
        state: Set(JobState::Queued),
        reason: Set(opts.reason),
        priority: Set(opts.priority),
        user_id: Set(user_id),
        repository_id: Set(repository_id),
        process_after: Set(opts.process_after),
        invalidate_caches: Set(opts.invalidate_caches),
        no_perms: Set(opts.no_perms),
        triggered_by_user_id: Set(opts.triggered_by_user_id),
        cancel: Set(false),
        cancellation_reason: Set(None),
        failure_message: Set(None),
        queued_at: Set(now()),
        started_at: Set(None),
        finished_at: Set(None),
        permissions_added: Set(0),
        permissions_removed: Set(0),
        permissions_found: Set(0),
        code_host_states: Set(CodeHostStates::default()),
        is_partial_success: Set(false),
        ..Default::default()
    };

    job.insert(conn)
        .await
        .map_err(|err| map_db_err("failed to insert permission sync job", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_inserts_without_existing_job() {
        for requested in [JobPriority::Low, JobPriority::Medium, JobPriority::High] {
            assert_eq!(decide(None, requested), Decision::Insert);
        }
    }

    #[test]
    fn test_decide_preempts_only_strictly_lower_priority() {
        assert_eq!(decide(Some(JobPriority::Low), JobPriority::Medium), Decision::Preempt);
        assert_eq!(decide(Some(JobPriority::Low), JobPriority::High), Decision::Preempt);
        assert_eq!(decide(Some(JobPriority::Medium), JobPriority::High), Decision::Preempt);
    }

    #[test]
    fn test_decide_drops_equal_or_lower_requests() {
        assert_eq!(decide(Some(JobPriority::Low), JobPriority::Low), Decision::Drop);
        assert_eq!(decide(Some(JobPriority::High), JobPriority::High), Decision::Drop);
        assert_eq!(decide(Some(JobPriority::High), JobPriority::Medium), Decision::Drop);
        assert_eq!(decide(Some(JobPriority::Medium), JobPriority::Low), Decision::Drop);
    }
}
