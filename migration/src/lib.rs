//! Database migrations for the permission sync job queue.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000001_create_users;
mod m2025_11_10_000002_create_repo;
mod m2025_11_10_000003_create_permission_sync_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000001_create_users::Migration),
            Box::new(m2025_11_10_000002_create_repo::Migration),
            Box::new(m2025_11_10_000003_create_permission_sync_jobs::Migration),
        ]
    }
}
