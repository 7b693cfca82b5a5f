//! # Data Models
//!
//! SeaORM entities for permission sync jobs and the subjects they target.

pub mod code_host_state;
pub mod permission_sync_job;
pub mod reason;
pub mod repo;
pub mod user;

pub use code_host_state::{CodeHostState, CodeHostStates, CodeHostStatus};
pub use permission_sync_job::Entity as PermissionSyncJob;
pub use permission_sync_job::{JobPriority, JobState, Subject};
pub use reason::{ReasonGroup, SyncReason};
pub use repo::Entity as Repo;
pub use user::Entity as User;
