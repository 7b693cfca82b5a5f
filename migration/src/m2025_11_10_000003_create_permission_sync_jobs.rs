//! Migration to create the permission_sync_jobs table.
//!
//! Every row is one scheduled or executed permission synchronization for exactly
//! one subject (a user or a repository). Rows cascade away with their subject.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PermissionSyncJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PermissionSyncJobs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::State)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(ColumnDef::new(PermissionSyncJobs::Reason).text().not_null())
                    .col(
                        ColumnDef::new(PermissionSyncJobs::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PermissionSyncJobs::UserId).integer().null())
                    .col(
                        ColumnDef::new(PermissionSyncJobs::RepositoryId)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::ProcessAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::InvalidateCaches)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::NoPerms)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::TriggeredByUserId)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::Cancel)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::CancellationReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::FailureMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::QueuedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::PermissionsAdded)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::PermissionsRemoved)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::PermissionsFound)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::CodeHostStates)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PermissionSyncJobs::IsPartialSuccess)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .check(Expr::cust("(user_id IS NULL) <> (repository_id IS NULL)"))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permission_sync_jobs_user_id")
                            .from(PermissionSyncJobs::Table, PermissionSyncJobs::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permission_sync_jobs_repository_id")
                            .from(PermissionSyncJobs::Table, PermissionSyncJobs::RepositoryId)
                            .to(Repo::Table, Repo::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Queue views order queued jobs by priority
        manager
            .create_index(
                Index::create()
                    .name("idx_permission_sync_jobs_state_priority")
                    .table(PermissionSyncJobs::Table)
                    .col(PermissionSyncJobs::State)
                    .col(PermissionSyncJobs::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_sync_jobs_user_id")
                    .table(PermissionSyncJobs::Table)
                    .col(PermissionSyncJobs::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_sync_jobs_repository_id")
                    .table(PermissionSyncJobs::Table)
                    .col(PermissionSyncJobs::RepositoryId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_sync_jobs_finished_at")
                    .table(PermissionSyncJobs::Table)
                    .col(PermissionSyncJobs::FinishedAt)
                    .to_owned(),
            )
            .await?;

        // At most one queued immediate job per subject
        let backend = manager.get_database_backend();
        for statement in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_permission_sync_jobs_user_queued \
             ON permission_sync_jobs (user_id) \
             WHERE state = 'queued' AND process_after IS NULL AND user_id IS NOT NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_permission_sync_jobs_repo_queued \
             ON permission_sync_jobs (repository_id) \
             WHERE state = 'queued' AND process_after IS NULL AND repository_id IS NOT NULL",
        ] {
            manager
                .get_connection()
                .execute(Statement::from_string(backend, statement.to_string()))
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        for index in [
            "idx_permission_sync_jobs_user_queued",
            "idx_permission_sync_jobs_repo_queued",
        ] {
            manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    format!("DROP INDEX IF EXISTS {index}"),
                ))
                .await?;
        }

        for index in [
            "idx_permission_sync_jobs_state_priority",
            "idx_permission_sync_jobs_user_id",
            "idx_permission_sync_jobs_repository_id",
            "idx_permission_sync_jobs_finished_at",
        ] {
            manager
                .drop_index(Index::drop().name(index).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(PermissionSyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PermissionSyncJobs {
    Table,
    Id,
    State,
    Reason,
    Priority,
    UserId,
    RepositoryId,
    ProcessAfter,
    InvalidateCaches,
    NoPerms,
    TriggeredByUserId,
    Cancel,
    CancellationReason,
    FailureMessage,
    QueuedAt,
    StartedAt,
    FinishedAt,
    PermissionsAdded,
    PermissionsRemoved,
    PermissionsFound,
    CodeHostStates,
    IsPartialSuccess,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Repo {
    Table,
    Id,
}
