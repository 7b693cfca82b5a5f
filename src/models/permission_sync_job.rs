//! PermissionSyncJob entity model
//!
//! This module contains the SeaORM entity model for the permission_sync_jobs
//! table. Each row is one scheduled or executed permission synchronization for
//! exactly one subject, either a user or a repository.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::code_host_state::CodeHostStates;
use super::reason::SyncReason;

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum JobState {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// `queued -> processing -> {completed, failed}`, and either live state may
    /// be canceled. Terminal states have no successors.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Queued, Self::Processing | Self::Canceled) => true,
            (Self::Processing, Self::Completed | Self::Failed | Self::Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Scheduling priority. Variant order is the priority order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum JobPriority {
    #[default]
    #[sea_orm(num_value = 0)]
    Low,
    #[sea_orm(num_value = 5)]
    Medium,
    #[sea_orm(num_value = 10)]
    High,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown job priority '{other}'")),
        }
    }
}

/// The user or repository a job targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    User(i32),
    Repo(i32),
}

impl Subject {
    pub fn id(self) -> i32 {
        match self {
            Self::User(id) | Self::Repo(id) => id,
        }
    }

    /// Label used in logs and metrics.
    pub fn kind(self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Repo(_) => "repo",
        }
    }

    pub(crate) fn column(self) -> Column {
        match self {
            Self::User(_) => Column::UserId,
            Self::Repo(_) => Column::RepositoryId,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// PermissionSyncJob entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "permission_sync_jobs")]
pub struct Model {
    /// Store-assigned identifier (primary key)
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Current lifecycle state
    pub state: JobState,

    /// Why the job was scheduled
    pub reason: SyncReason,

    pub priority: JobPriority,

    /// Target user; set exactly when `repository_id` is not
    pub user_id: Option<i32>,

    /// Target repository; set exactly when `user_id` is not
    pub repository_id: Option<i32>,

    /// Delayed jobs are not processed before this instant and skip deduplication
    pub process_after: Option<DateTimeWithTimeZone>,

    pub invalidate_caches: bool,

    pub no_perms: bool,

    /// User who requested the sync, for manual triggers
    pub triggered_by_user_id: Option<i32>,

    /// Cancellation has been requested
    pub cancel: bool,

    pub cancellation_reason: Option<String>,

    /// Set only when the job failed
    pub failure_message: Option<String>,

    pub queued_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub permissions_added: i32,

    pub permissions_removed: i32,

    pub permissions_found: i32,

    /// Per-code-host outcomes, in the order the worker reported them
    #[sea_orm(column_type = "JsonBinary")]
    pub code_host_states: CodeHostStates,

    /// Completed overall but failed against at least one code host
    pub is_partial_success: bool,
}

impl Model {
    /// The job's subject. Returns `None` only for rows that violate the
    /// one-subject constraint.
    pub fn subject(&self) -> Option<Subject> {
        match (self.user_id, self.repository_id) {
            (Some(user_id), None) => Some(Subject::User(user_id)),
            (None, Some(repo_id)) => Some(Subject::Repo(repo_id)),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::repo::Entity",
        from = "Column::RepositoryId",
        to = "super::repo::Column::Id",
        on_delete = "Cascade"
    )]
    Repo,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::repo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
