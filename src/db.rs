//! Database connection and pool management.
//!
//! This module initializes the SeaORM connection pool from configuration and
//! applies the schema migrations the queue depends on.

use anyhow::{Context, Result};
use migration::Migrator;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Connection attempts are retried with exponential backoff so the CLI
/// tolerates a database that is still starting up. Once connected, storage
/// errors are never retried.
///
/// # Examples
///
/// ```no_run
/// use permsync::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     // Use the database connection...
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                tracing::info!(attempt, "Connected to database");
                return Ok(conn);
            }
            Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "Database connection attempt failed; retrying"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(attempts = attempt, error = %err, "Failed to connect to database");
                return Err(DatabaseError::ConnectionFailed { source: err }.into());
            }
        }
    }
}

/// Applies all pending migrations.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    Ok(())
}

/// Verifies that the database connection is still active.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}
