//! # PermissionSyncJob Repository
//!
//! Admission, cancellation, result recording and querying of permission sync
//! jobs. The store is a passive data structure over the shared database: every
//! operation is a single statement or one short transaction, and the partial
//! unique indexes on queued immediate jobs are the serialization point between
//! concurrent callers.

mod admission;
mod options;
mod query;

pub use admission::Admission;
pub use options::{ListOptions, SearchType};
pub use query::JobWithPlaceInQueue;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use tracing::{debug, error, info};

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::permission_sync_job::{Column, Entity};
use crate::models::{CodeHostState, CodeHostStates, JobPriority, JobState, Subject, SyncReason};

/// Cancellation reason recorded on a queued job displaced by a higher-priority one.
pub const CANCELLATION_REASON_HIGHER_PRIORITY: &str = "higher-priority-job";

/// Unique-index conflicts tolerated per admission before the request is dropped.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

/// Scheduling parameters for a new job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOptions {
    pub reason: SyncReason,
    pub priority: JobPriority,
    /// Delays the job and exempts it from deduplication
    pub process_after: Option<DateTimeWithTimeZone>,
    pub invalidate_caches: bool,
    pub no_perms: bool,
    pub triggered_by_user_id: Option<i32>,
}

impl JobOptions {
    pub fn new(reason: SyncReason) -> Self {
        Self {
            reason,
            priority: JobPriority::default(),
            process_after: None,
            invalidate_caches: false,
            no_perms: false,
            triggered_by_user_id: None,
        }
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn process_after(mut self, at: DateTimeWithTimeZone) -> Self {
        self.process_after = Some(at);
        self
    }

    pub fn invalidate_caches(mut self) -> Self {
        self.invalidate_caches = true;
        self
    }

    pub fn no_perms(mut self) -> Self {
        self.no_perms = true;
        self
    }

    pub fn triggered_by(mut self, user_id: i32) -> Self {
        self.triggered_by_user_id = Some(user_id);
        self
    }
}

/// Selects the queued jobs a cancellation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelSelector {
    Job(i32),
    /// Every queued job of the subject, immediate or delayed
    Subject(Subject),
}

impl CancelSelector {
    fn condition(self) -> Condition {
        match self {
            Self::Job(id) => Condition::all().add(Column::Id.eq(id)),
            Self::Subject(subject) => Condition::all().add(subject.column().eq(subject.id())),
        }
    }
}

/// Permission counters reported by a worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermissionsDelta {
    pub added: i32,
    pub removed: i32,
    pub found: i32,
}

/// Repository for permission sync job operations
#[derive(Clone, Debug)]
pub struct PermissionSyncJobStore {
    db: DatabaseConnection,
    conflict_retries: u32,
}

impl PermissionSyncJobStore {
    /// Create a new store over the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Number of times admission is re-evaluated after losing a uniqueness race.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Cancel queued jobs matching `selector`.
    ///
    /// Returns the number of jobs canceled. Fails with `NotFound` when nothing
    /// matched: the job does not exist, is no longer queued, or was already
    /// canceled.
    pub async fn cancel_queued_job(
        &self,
        reason: &str,
        selector: CancelSelector,
    ) -> Result<u64, RepositoryError> {
        let canceled = cancel_queued(&self.db, reason, selector.condition()).await?;
        if canceled == 0 {
            return Err(RepositoryError::not_found(format!(
                "no queued permission sync job matches {selector:?}"
            )));
        }

        info!(?selector, canceled, reason, "Canceled queued permission sync jobs");
        Ok(canceled)
    }

    /// Record the outcome of an executed job and move it to its terminal state.
    ///
    /// Only `processing` jobs accept a result. Fails with `NotFound` when the
    /// job does not exist, was never claimed, or has already finished.
    pub async fn save_sync_result(
        &self,
        job_id: i32,
        success: bool,
        result: Option<PermissionsDelta>,
        code_host_states: Vec<CodeHostState>,
    ) -> Result<(), RepositoryError> {
        let states = CodeHostStates::from(code_host_states);
        let delta = result.unwrap_or_default();
        let state = if success {
            JobState::Completed
        } else {
            JobState::Failed
        };
        let failure_message = if success {
            None
        } else {
            states.first_error_message().map(str::to_string)
        };
        let is_partial_success = states.is_partial_success(success);

        let update = Entity::update_many()
            .col_expr(Column::State, Expr::value(state))
            .col_expr(Column::FinishedAt, Expr::value(now()))
            .col_expr(Column::PermissionsAdded, Expr::value(delta.added))
            .col_expr(Column::PermissionsRemoved, Expr::value(delta.removed))
            .col_expr(Column::PermissionsFound, Expr::value(delta.found))
            .col_expr(Column::CodeHostStates, Expr::value(states))
            .col_expr(Column::IsPartialSuccess, Expr::value(is_partial_success))
            .col_expr(Column::FailureMessage, Expr::value(failure_message))
            .filter(Column::Id.eq(job_id))
            .filter(Column::State.eq(JobState::Processing))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to save permission sync result", err))?;

        if update.rows_affected == 0 {
            return Err(RepositoryError::not_found(format!(
                "permission sync job {job_id} does not exist or is not processing"
            )));
        }

        info!(
            job_id,
            state = %state,
            permissions_added = delta.added,
            permissions_removed = delta.removed,
            permissions_found = delta.found,
            is_partial_success,
            "Saved permission sync result"
        );

        Ok(())
    }
}

/// Cancel the queued, not yet canceled jobs matching `filter` on `conn`.
async fn cancel_queued<C>(conn: &C, reason: &str, filter: Condition) -> Result<u64, RepositoryError>
where
    C: ConnectionTrait,
{
    let update = Entity::update_many()
        .col_expr(Column::Cancel, Expr::value(true))
        .col_expr(Column::State, Expr::value(JobState::Canceled))
        .col_expr(Column::FinishedAt, Expr::value(now()))
        .col_expr(Column::CancellationReason, Expr::value(reason.to_string()))
        .filter(filter)
        .filter(Column::State.eq(JobState::Queued))
        .filter(Column::Cancel.eq(false))
        .exec(conn)
        .await
        .map_err(|err| map_db_err("failed to cancel queued permission sync job", err))?;

    Ok(update.rows_affected)
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

fn map_db_err(context: &'static str, err: DbErr) -> RepositoryError {
    if is_unique_violation(&err) {
        debug!(error = ?err, context, "Unique constraint violation");
    } else {
        error!(error = ?err, context, "Database operation failed");
    }
    RepositoryError::database_error(err)
}
