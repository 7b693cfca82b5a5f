//! # Permission Sync Job Queue
//!
//! Persistence layer for permission synchronization jobs: admission with
//! per-subject deduplication and priority preemption, cancellation, result
//! recording, and a filtered, cursor-paginated query surface.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod repositories;
pub mod telemetry;
pub use migration;
