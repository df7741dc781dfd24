//! Repository connection persistence
//!
//! Connections are the reference count on a hook: a hook lives exactly as
//! long as at least one connection points at it.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{HookError, is_unique_violation};
use crate::models::repo_connection::{self, Column, Entity as RepoConnectionEntity};

/// Kind of resource that can be connected to a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Workspace,
    Module,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Workspace => "workspace",
            ResourceType::Module => "module",
        }
    }

    fn column(&self) -> Column {
        match self {
            ResourceType::Workspace => Column::WorkspaceId,
            ResourceType::Module => Column::ModuleId,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(ResourceType::Workspace),
            "module" => Ok(ResourceType::Module),
            other => Err(HookError::InvalidArgument(format!(
                "unknown connection type '{other}'"
            ))),
        }
    }
}

/// A resource linked to a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Connection {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[schema(value_type = String)]
    pub hook_id: Uuid,
    #[schema(value_type = String)]
    pub vcs_provider_id: Uuid,
}

impl TryFrom<repo_connection::Model> for Connection {
    type Error = HookError;

    fn try_from(model: repo_connection::Model) -> Result<Self, Self::Error> {
        let (resource_type, resource_id) = match (model.workspace_id, model.module_id) {
            (Some(id), None) => (ResourceType::Workspace, id),
            (None, Some(id)) => (ResourceType::Module, id),
            _ => {
                return Err(HookError::InvalidArgument(format!(
                    "repo connection {} must reference exactly one resource",
                    model.id
                )));
            }
        };
        Ok(Self {
            id: model.id,
            resource_type,
            resource_id,
            hook_id: model.hook_id,
            vcs_provider_id: model.vcs_provider_id,
        })
    }
}

/// Inserts a connection from `resource_id` to `hook_id`.
pub async fn create_connection<C: ConnectionTrait>(
    conn: &C,
    hook_id: Uuid,
    vcs_provider_id: Uuid,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Connection, HookError> {
    let (workspace_id, module_id) = match resource_type {
        ResourceType::Workspace => (Some(resource_id.to_string()), None),
        ResourceType::Module => (None, Some(resource_id.to_string())),
    };

    let model = repo_connection::ActiveModel {
        id: Set(Uuid::new_v4()),
        hook_id: Set(hook_id),
        vcs_provider_id: Set(vcs_provider_id),
        workspace_id: Set(workspace_id),
        module_id: Set(module_id),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            HookError::AlreadyExists(format!("{resource_type} {resource_id} is already connected"))
        } else {
            HookError::database("inserting repo connection")(e)
        }
    })?;

    model.try_into()
}

pub async fn find_connection<C: ConnectionTrait>(
    conn: &C,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Option<Connection>, HookError> {
    RepoConnectionEntity::find()
        .filter(resource_type.column().eq(resource_id))
        .one(conn)
        .await
        .map_err(HookError::database("loading repo connection"))?
        .map(Connection::try_from)
        .transpose()
}

/// Deletes the resource's connection, returning `(hook_id, vcs_provider_id)`.
pub async fn delete_connection<C: ConnectionTrait>(
    conn: &C,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<(Uuid, Uuid), HookError> {
    let connection = find_connection(conn, resource_type, resource_id)
        .await?
        .ok_or_else(|| HookError::not_found(format!("{resource_type} {resource_id} connection")))?;

    RepoConnectionEntity::delete_by_id(connection.id)
        .exec(conn)
        .await
        .map_err(HookError::database("deleting repo connection"))?;

    Ok((connection.hook_id, connection.vcs_provider_id))
}

/// Number of connections still referencing `hook_id`.
pub async fn count_connections<C: ConnectionTrait>(
    conn: &C,
    hook_id: Uuid,
) -> Result<u64, HookError> {
    RepoConnectionEntity::find()
        .filter(Column::HookId.eq(hook_id))
        .count(conn)
        .await
        .map_err(HookError::database("counting repo connections"))
}

pub async fn list_by_vcs_provider<C: ConnectionTrait>(
    conn: &C,
    vcs_provider_id: Uuid,
) -> Result<Vec<Connection>, HookError> {
    RepoConnectionEntity::find()
        .filter(Column::VcsProviderId.eq(vcs_provider_id))
        .order_by_asc(Column::CreatedAt)
        .all(conn)
        .await
        .map_err(HookError::database("listing repo connections"))?
        .into_iter()
        .map(Connection::try_from)
        .collect()
}
