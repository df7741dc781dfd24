//! VCS provider repository
//!
//! Persists provider credentials with the API token encrypted at rest.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CryptoKey, decrypt_provider_token, encrypt_provider_token};
use crate::error::HookError;
use crate::models::vcs_provider::{self, Entity as VcsProviderEntity};
use crate::vcs::{Cloud, VcsProvider};

/// Input for registering a provider.
#[derive(Debug, Clone)]
pub struct NewVcsProvider {
    pub name: String,
    pub organization: String,
    pub cloud: Cloud,
    pub api_base: Option<String>,
    pub token: String,
}

/// Repository for VCS provider rows
#[derive(Debug, Clone)]
pub struct VcsProviderRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl VcsProviderRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Stores a provider, encrypting its token under the new row's id.
    pub async fn create(&self, new: NewVcsProvider) -> Result<VcsProvider, HookError> {
        if new.token.trim().is_empty() {
            return Err(HookError::InvalidArgument("token must not be empty".into()));
        }
        if let Some(base) = &new.api_base {
            url::Url::parse(base).map_err(|e| {
                HookError::InvalidArgument(format!("invalid api_base '{base}': {e}"))
            })?;
        }

        let id = Uuid::new_v4();
        let token_ciphertext = encrypt_provider_token(&self.crypto_key, id, &new.token)
            .map_err(|e| HookError::InvalidArgument(format!("token encryption failed: {e}")))?;
        let now = Utc::now().into();

        let model = vcs_provider::ActiveModel {
            id: Set(id),
            name: Set(new.name),
            organization: Set(new.organization),
            cloud: Set(new.cloud.as_str().to_string()),
            api_base: Set(new.api_base),
            token_ciphertext: Set(token_ciphertext),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .map_err(HookError::database("inserting vcs provider"))?;

        tracing::info!(vcs_provider_id = %id, cloud = %new.cloud, "vcs provider created");
        to_domain(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<vcs_provider::Model>, HookError> {
        VcsProviderEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(HookError::database("loading vcs provider"))
    }

    /// Loads a provider or fails with [`HookError::NotFound`].
    pub async fn get(&self, id: Uuid) -> Result<VcsProvider, HookError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| HookError::not_found(format!("vcs provider {id}")))
            .and_then(to_domain)
    }

    /// Decrypts the stored token; any failure surfaces as invalid credentials.
    pub fn decrypt_token(
        &self,
        model: &vcs_provider::Model,
    ) -> Result<Zeroizing<String>, HookError> {
        decrypt_provider_token(&self.crypto_key, model.id, &model.token_ciphertext).map_err(|e| {
            tracing::error!(vcs_provider_id = %model.id, "token decryption failed");
            HookError::InvalidCredentials {
                vcs_provider_id: model.id,
                reason: e.to_string(),
            }
        })
    }

    /// Deletes the row; connections referencing it cascade.
    pub async fn delete(&self, id: Uuid) -> Result<(), HookError> {
        let result = VcsProviderEntity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(HookError::database("deleting vcs provider"))?;
        if result.rows_affected == 0 {
            return Err(HookError::not_found(format!("vcs provider {id}")));
        }
        Ok(())
    }
}

fn to_domain(model: vcs_provider::Model) -> Result<VcsProvider, HookError> {
    Ok(VcsProvider {
        cloud: model.cloud.parse()?,
        id: model.id,
        name: model.name,
        organization: model.organization,
        api_base: model.api_base,
    })
}
