//! Repository connection entity model
//!
//! Links one workspace or module to a [`super::hook`] row. Exactly one of
//! `workspace_id` and `module_id` is set; the database enforces it.

use super::hook::Entity as Hook;
use super::vcs_provider::Entity as VcsProvider;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repo_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Hook shared with every other resource on the same repository
    pub hook_id: Uuid,

    /// Provider whose credentials manage the hook
    pub vcs_provider_id: Uuid,

    pub workspace_id: Option<String>,

    pub module_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Hook",
        from = "Column::HookId",
        to = "super::hook::Column::Id",
        on_delete = "Cascade"
    )]
    Hook,
    #[sea_orm(
        belongs_to = "VcsProvider",
        from = "Column::VcsProviderId",
        to = "super::vcs_provider::Column::Id",
        on_delete = "Cascade"
    )]
    VcsProvider,
}

impl Related<Hook> for Entity {
    fn to() -> RelationDef {
        Relation::Hook.def()
    }
}

impl Related<VcsProvider> for Entity {
    fn to() -> RelationDef {
        Relation::VcsProvider.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
