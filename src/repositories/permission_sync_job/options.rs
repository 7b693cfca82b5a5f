//! Filters for listing and counting permission sync jobs.

use std::fmt;
use std::str::FromStr;

use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{ColumnTrait, Condition, EntityTrait, JoinType, QueryFilter, QuerySelect, RelationTrait, Select};

use crate::error::RepositoryError;
use crate::models::permission_sync_job::{Column, Entity, Relation};
use crate::models::{JobState, ReasonGroup, SyncReason, repo, user};
use crate::pagination::PaginationArgs;

/// Which subject kind a text search targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchType {
    User,
    Repo,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Repo => f.write_str("repo"),
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "repo" | "repository" => Ok(Self::Repo),
            other => Err(format!("unknown search type '{other}'")),
        }
    }
}

/// Conjunctive filters over permission sync jobs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub id: Option<i32>,
    pub user_id: Option<i32>,
    pub repo_id: Option<i32>,
    pub state: Option<JobState>,
    /// Takes precedence over `reason_group`
    pub reason: Option<SyncReason>,
    pub reason_group: Option<ReasonGroup>,
    /// Completed jobs that failed against some code host; overrides `state`
    pub partial_success: bool,
    pub null_process_after: bool,
    pub not_null_process_after: bool,
    pub not_canceled: bool,
    pub search_type: Option<SearchType>,
    /// Case-insensitive substring; ignored without `search_type`
    pub query: Option<String>,
    pub pagination: Option<PaginationArgs>,
}

impl ListOptions {
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.null_process_after && self.not_null_process_after {
            return Err(RepositoryError::validation(
                "null_process_after and not_null_process_after are mutually exclusive",
            ));
        }
        if let Some(pagination) = &self.pagination {
            pagination.validate()?;
        }
        Ok(())
    }

    /// Predicates on the jobs table itself.
    pub(crate) fn condition(&self) -> Condition {
        let mut cond = Condition::all();

        if let Some(id) = self.id {
            cond = cond.add(Column::Id.eq(id));
        }
        if let Some(user_id) = self.user_id {
            cond = cond.add(Column::UserId.eq(user_id));
        }
        if let Some(repo_id) = self.repo_id {
            cond = cond.add(Column::RepositoryId.eq(repo_id));
        }

        if let Some(reason) = self.reason {
            cond = cond.add(Column::Reason.eq(reason));
        } else if let Some(group) = self.reason_group {
            cond = cond.add(Column::Reason.is_in(group.reasons()));
        }

        if self.partial_success {
            cond = cond
                .add(Column::IsPartialSuccess.eq(true))
                .add(Column::State.eq(JobState::Completed));
        } else if let Some(state) = self.state {
            cond = cond
                .add(Column::State.eq(state))
                .add(Column::IsPartialSuccess.eq(false));
        }

        if self.null_process_after {
            cond = cond.add(Column::ProcessAfter.is_null());
        }
        if self.not_null_process_after {
            cond = cond.add(Column::ProcessAfter.is_not_null());
        }
        if self.not_canceled {
            cond = cond.add(Column::Cancel.eq(false));
        }

        match self.search_type {
            Some(SearchType::User) => cond = cond.add(Column::UserId.is_not_null()),
            Some(SearchType::Repo) => cond = cond.add(Column::RepositoryId.is_not_null()),
            None => {}
        }

        cond
    }

    /// Search text, lowercased, when it applies.
    fn search_pattern(&self) -> Option<String> {
        self.search_type?;
        let query = self.query.as_deref()?.trim();
        if query.is_empty() {
            return None;
        }
        Some(format!("%{}%", escape_like(&query.to_lowercase())))
    }

    /// Jobs selected by every filter, without pagination.
    pub(crate) fn select(&self) -> Result<Select<Entity>, RepositoryError> {
        self.validate()?;
        let mut query = Entity::find();
        let cond = self.condition();
        if !cond.is_empty() {
            query = query.filter(cond);
        }

        if let (Some(search_type), Some(pattern)) = (self.search_type, self.search_pattern()) {
            query = match search_type {
                SearchType::Repo => query
                    .join(JoinType::InnerJoin, Relation::Repo.def())
                    .filter(lower_like((repo::Entity, repo::Column::Name), &pattern)),
                SearchType::User => query
                    .join(JoinType::InnerJoin, Relation::User.def())
                    .filter(
                        Condition::any()
                            .add(lower_like((user::Entity, user::Column::Username), &pattern))
                            .add(lower_like(
                                (user::Entity, user::Column::DisplayName),
                                &pattern,
                            )),
                    ),
            };
        }

        Ok(query)
    }
}

fn lower_like<C>(column: C, pattern: &str) -> sea_orm::sea_query::SimpleExpr
where
    C: sea_orm::sea_query::IntoColumnRef,
{
    Expr::expr(Func::lower(Expr::col(column))).like(LikeExpr::new(pattern).escape('\\'))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
