//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for permission sync jobs and the subjects they target.

pub mod permission_sync_job;
pub mod subject;

pub use permission_sync_job::{
    Admission, CancelSelector, JobOptions, JobWithPlaceInQueue, ListOptions,
    PermissionSyncJobStore, PermissionsDelta, SearchType,
};
pub use subject::{SubjectRepository, SubjectResolver};
