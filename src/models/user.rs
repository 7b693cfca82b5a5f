//! User entity model
//!
//! Users are owned by the account service; the queue only reads them to
//! resolve and search job subjects.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Unique login name
    pub username: String,

    pub display_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::permission_sync_job::Entity")]
    PermissionSyncJobs,
}

impl Related<super::permission_sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PermissionSyncJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
