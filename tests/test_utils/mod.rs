//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations for testing purposes, plus fixtures for the user and
//! repository rows jobs point at.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use migration::{Migrator, MigratorTrait};
use permsync::models::{repo, user};
use permsync::repositories::PermissionSyncJobStore;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// Foreign keys are enforced so subject deletion cascades to jobs the way
/// it does on Postgres.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Fresh database plus a store over it.
#[allow(dead_code)]
pub async fn setup_store() -> Result<(DatabaseConnection, PermissionSyncJobStore)> {
    let db = setup_test_db().await?;
    let store = PermissionSyncJobStore::new(db.clone());
    Ok((db, store))
}

/// Inserts a user row and returns its id.
#[allow(dead_code)]
pub async fn insert_user(
    db: &DatabaseConnection,
    username: &str,
    display_name: Option<&str>,
) -> Result<i32> {
    let user = user::ActiveModel {
        username: Set(username.to_string()),
        display_name: Set(display_name.map(str::to_string)),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(user.id)
}

/// Inserts a repository row and returns its id.
#[allow(dead_code)]
pub async fn insert_repo(db: &DatabaseConnection, name: &str) -> Result<i32> {
    let repo = repo::ActiveModel {
        name: Set(name.to_string()),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(repo.id)
}

/// Moves a queued job to processing, as a worker claiming it would.
#[allow(dead_code)]
pub async fn mark_processing(db: &DatabaseConnection, job_id: i32) -> Result<()> {
    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "UPDATE permission_sync_jobs SET state = 'processing', started_at = queued_at WHERE id = ?",
        [job_id.into()],
    ))
    .await?;
    Ok(())
}

/// Overrides a job's finish time so ordering between jobs is deterministic.
#[allow(dead_code)]
pub async fn set_finished_at(
    db: &DatabaseConnection,
    job_id: i32,
    finished_at: DateTime<FixedOffset>,
) -> Result<()> {
    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "UPDATE permission_sync_jobs SET finished_at = ? WHERE id = ?",
        [finished_at.into(), job_id.into()],
    ))
    .await?;
    Ok(())
}

/// Parses an RFC 3339 timestamp.
#[allow(dead_code)]
pub fn ts(raw: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(raw).unwrap()
}
