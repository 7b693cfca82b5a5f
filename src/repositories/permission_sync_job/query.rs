//! Read side of the permission sync job store: listing, counting, latest
//! finished job lookups and failing-subject counts.

use std::collections::HashMap;

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QuerySelect, Statement,
};

use super::{ListOptions, PermissionSyncJobStore, map_db_err};
use crate::error::RepositoryError;
use crate::models::{JobPriority, JobState};
use crate::models::permission_sync_job::{Column, Entity, Model};
use crate::pagination::{OrderField, PaginationArgs};

/// A listed job together with its position in the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct JobWithPlaceInQueue {
    pub job: Model,
    /// 1-based rank among all queued jobs; `None` for jobs that are not queued
    pub place_in_queue: Option<u64>,
}

type QueueKey = (i32, JobPriority, Option<DateTimeWithTimeZone>);

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

const FAILING_USERS_SQL: &str = "SELECT COUNT(*) AS count FROM permission_sync_jobs j \
     WHERE j.user_id IS NOT NULL AND j.state = 'failed' AND j.finished_at IS NOT NULL \
     AND NOT EXISTS (SELECT 1 FROM permission_sync_jobs k \
     WHERE k.user_id = j.user_id AND k.state IN ('completed', 'failed') AND k.finished_at IS NOT NULL \
     AND (k.finished_at > j.finished_at OR (k.finished_at = j.finished_at AND k.id > j.id)))";

const FAILING_REPOS_SQL: &str = "SELECT COUNT(*) AS count FROM permission_sync_jobs j \
     WHERE j.repository_id IS NOT NULL AND j.state = 'failed' AND j.finished_at IS NOT NULL \
     AND NOT EXISTS (SELECT 1 FROM permission_sync_jobs k \
     WHERE k.repository_id = j.repository_id AND k.state IN ('completed', 'failed') AND k.finished_at IS NOT NULL \
     AND (k.finished_at > j.finished_at OR (k.finished_at = j.finished_at AND k.id > j.id)))";

impl PermissionSyncJobStore {
    /// Fetch a single job by id.
    pub async fn get_by_id(&self, id: i32) -> Result<Option<Model>, RepositoryError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load permission sync job", err))
    }

    /// Jobs matching `opts`, ordered and paged by `opts.pagination`
    /// (id ascending when absent).
    pub async fn list(&self, opts: &ListOptions) -> Result<Vec<Model>, RepositoryError> {
        let query = opts.select()?;
        let pagination = opts.pagination.clone().unwrap_or_default();
        let (query, reverse) = pagination.apply(query)?;

        let mut jobs = query
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list permission sync jobs", err))?;

        if reverse {
            jobs.reverse();
        }
        Ok(jobs)
    }

    /// Like [`list`](Self::list), with each queued job's rank in the queue.
    pub async fn list_with_place_in_queue(
        &self,
        opts: &ListOptions,
    ) -> Result<Vec<JobWithPlaceInQueue>, RepositoryError> {
        let jobs = self.list(opts).await?;
        if !jobs.iter().any(|job| job.state == JobState::Queued) {
            return Ok(jobs
                .into_iter()
                .map(|job| JobWithPlaceInQueue {
                    job,
                    place_in_queue: None,
                })
                .collect());
        }

        let ranks = self.queue_ranks().await?;
        Ok(jobs
            .into_iter()
            .map(|job| {
                let place_in_queue = ranks.get(&job.id).copied();
                JobWithPlaceInQueue {
                    job,
                    place_in_queue,
                }
            })
            .collect())
    }

    /// Rank of every queued job: priority descending, then process_after
    /// ascending with undelayed jobs first, then id.
    async fn queue_ranks(&self) -> Result<HashMap<i32, u64>, RepositoryError> {
        let mut queued: Vec<QueueKey> = Entity::find()
            .select_only()
            .column(Column::Id)
            .column(Column::Priority)
            .column(Column::ProcessAfter)
            .filter(Column::State.eq(JobState::Queued))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load queued permission sync jobs", err))?;

        queued.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| match (a.2, b.2) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(queued
            .into_iter()
            .enumerate()
            .map(|(rank, (id, _, _))| (id, rank as u64 + 1))
            .collect())
    }

    /// Number of jobs matching the filters of `opts`. Pagination is ignored.
    pub async fn count(&self, opts: &ListOptions) -> Result<u64, RepositoryError> {
        opts.select()?
            .count(&self.db)
            .await
            .map_err(|err| map_db_err("failed to count permission sync jobs", err))
    }

    /// The most recently finished job matching `opts`.
    pub async fn get_latest_finished_sync_job(
        &self,
        opts: &ListOptions,
    ) -> Result<Option<Model>, RepositoryError> {
        let mut opts = opts.clone();
        opts.pagination = Some(
            PaginationArgs::first(1)
                .order_by([OrderField::FinishedAt])
                .descending(),
        );

        let query = opts
            .select()?
            .filter(Column::FinishedAt.is_not_null())
            .filter(Column::State.is_in([JobState::Completed, JobState::Failed, JobState::Canceled]));
        let (query, _) = opts.pagination.unwrap_or_default().apply(query)?;

        query
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load latest finished permission sync job", err))
    }

    /// Users whose latest finished (completed or failed) job failed.
    pub async fn count_users_with_failing_sync_job(&self) -> Result<i32, RepositoryError> {
        self.count_failing(FAILING_USERS_SQL).await
    }

    /// Repositories whose latest finished (completed or failed) job failed.
    pub async fn count_repos_with_failing_sync_job(&self) -> Result<i32, RepositoryError> {
        self.count_failing(FAILING_REPOS_SQL).await
    }

    async fn count_failing(&self, sql: &str) -> Result<i32, RepositoryError> {
        let row = CountRow::find_by_statement(Statement::from_string(
            self.db.get_database_backend(),
            sql.to_string(),
        ))
        .one(&self.db)
        .await
        .map_err(|err| map_db_err("failed to count subjects with failing sync jobs", err))?;

        let count = row.map(|row| row.count).unwrap_or(0);
        i32::try_from(count).map_err(|_| {
            RepositoryError::database_error(DbErr::Custom(format!(
                "failing subject count {count} does not fit in i32"
            )))
        })
    }
}
