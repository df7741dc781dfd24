//! Hook entity model
//!
//! One row per `(repo_identifier, cloud)`: the webhook shared by every
//! resource connected to that repository.

use super::repo_connection::Entity as RepoConnection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "hooks")]
pub struct Model {
    /// Internal identifier, embedded in the callback endpoint
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Identifier assigned by the VCS provider; unset until first registration
    pub cloud_id: Option<String>,

    /// Shared signing secret, never rotated
    pub secret: String,

    /// Repository path, e.g. `owner/name`
    pub repo_identifier: String,

    /// Cloud slug (`github`, `gitlab`)
    pub cloud: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "RepoConnection")]
    RepoConnection,
}

impl Related<RepoConnection> for Entity {
    fn to() -> RelationDef {
        Relation::RepoConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
