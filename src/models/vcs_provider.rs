//! VCS provider entity model
//!
//! Stores the credentials used to reach one source-control host on behalf of
//! an organization.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "vcs_providers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human readable name
    pub name: String,

    /// Organization owning the credentials
    pub organization: String,

    /// Cloud slug (`github`, `gitlab`)
    pub cloud: String,

    /// Optional API base URL override for self-hosted installations
    pub api_base: Option<String>,

    /// AES-256-GCM ciphertext of the API token (nonce || ciphertext || tag)
    pub token_ciphertext: Vec<u8>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::repo_connection::Entity")]
    RepoConnection,
}

impl Related<super::repo_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepoConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
