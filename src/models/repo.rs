//! Repository entity model (the `repo` table).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Fully qualified name, e.g. `github.com/org/project`
    pub name: String,

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
