//! Hook persistence
//!
//! Every method is generic over the executor so it can run inside the
//! locked transaction opened by the connection service.

use chrono::Utc;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::error::HookError;
use crate::hook::Hook;
use crate::models::hook::{self, Entity as HookEntity};
use crate::models::repo_connection::{self, Entity as RepoConnectionEntity};

/// Loads and stores [`Hook`]s, deriving callback endpoints from `hostname`.
#[derive(Debug, Clone)]
pub struct HookRepository {
    hostname: String,
}

impl HookRepository {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the persisted hook for the candidate's `(repo_identifier, cloud)`,
    /// inserting the candidate when none exists.
    ///
    /// Not race-free on its own; callers hold the hook table lock.
    pub async fn get_or_create_hook<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidate: Hook,
    ) -> Result<Hook, HookError> {
        let existing = HookEntity::find()
            .filter(hook::Column::RepoIdentifier.eq(candidate.repo_identifier.as_str()))
            .filter(hook::Column::Cloud.eq(candidate.cloud.as_str()))
            .one(conn)
            .await
            .map_err(HookError::database("looking up hook"))?;
        if let Some(model) = existing {
            return Hook::from_model(model, &self.hostname);
        }

        hook::ActiveModel {
            id: Set(candidate.id),
            cloud_id: Set(candidate.cloud_id.clone()),
            secret: Set(candidate.secret.clone()),
            repo_identifier: Set(candidate.repo_identifier.clone()),
            cloud: Set(candidate.cloud.as_str().to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(conn)
        .await
        .map_err(HookError::database("inserting hook"))?;

        tracing::debug!(hook_id = %candidate.id, repo = %candidate.repo_identifier, "hook created");
        Ok(candidate)
    }

    pub async fn find_hook<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Hook>, HookError> {
        HookEntity::find_by_id(id)
            .one(conn)
            .await
            .map_err(HookError::database("loading hook"))?
            .map(|model| Hook::from_model(model, &self.hostname))
            .transpose()
    }

    pub async fn get_hook<C: ConnectionTrait>(&self, conn: &C, id: Uuid) -> Result<Hook, HookError> {
        self.find_hook(conn, id)
            .await?
            .ok_or_else(|| HookError::not_found(format!("hook {id}")))
    }

    pub async fn update_cloud_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        cloud_id: &str,
    ) -> Result<(), HookError> {
        let result = HookEntity::update_many()
            .col_expr(hook::Column::CloudId, Expr::value(cloud_id))
            .filter(hook::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(HookError::database("updating hook cloud id"))?;
        if result.rows_affected == 0 {
            return Err(HookError::not_found(format!("hook {id}")));
        }
        Ok(())
    }

    /// Hard-deletes the hook and returns the row as it was.
    pub async fn delete_hook<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Hook, HookError> {
        let hook = self.get_hook(conn, id).await?;
        HookEntity::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(HookError::database("deleting hook"))?;
        Ok(hook)
    }

    /// Hooks no connection points at.
    pub async fn list_unreferenced<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<Hook>, HookError> {
        HookEntity::find()
            .filter(
                hook::Column::Id.not_in_subquery(
                    Query::select()
                        .column(repo_connection::Column::HookId)
                        .from(RepoConnectionEntity)
                        .to_owned(),
                ),
            )
            .all(conn)
            .await
            .map_err(HookError::database("listing unreferenced hooks"))?
            .into_iter()
            .map(|model| Hook::from_model(model, &self.hostname))
            .collect()
    }
}
