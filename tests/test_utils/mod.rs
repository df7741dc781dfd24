//! Test utilities for database testing.
//!
//! Sets up in-memory SQLite databases with migrations applied and wires a
//! [`ConnectionService`] to the in-process fake VCS client.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, EntityTrait, PaginatorTrait};
use vcs_hooks::crypto::CryptoKey;
use vcs_hooks::models::{Hook as HookEntity, RepoConnection as RepoConnectionEntity};
use vcs_hooks::repositories::vcs_provider::NewVcsProvider;
use vcs_hooks::repositories::{HookRepository, ResourceType, VcsProviderRepository};
use vcs_hooks::service::{ConnectOptions, ConnectionService, DisconnectOptions};
use vcs_hooks::testing::{FakeVcsClient, StaticProviderResolver};
use vcs_hooks::vcs::{Cloud, VcsProvider};

pub const HOSTNAME: &str = "otf.example.com";
pub const REPO: &str = "acme/infra";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![0x5a; 32]).expect("32 byte key")
}

/// Inserts a provider row so connections satisfy their foreign key.
pub async fn insert_provider(db: Arc<DatabaseConnection>, cloud: Cloud) -> Result<VcsProvider> {
    let provider = VcsProviderRepository::new(db, test_crypto_key())
        .create(NewVcsProvider {
            name: format!("{cloud}-acme"),
            organization: "acme".into(),
            cloud,
            api_base: None,
            token: "token".into(),
        })
        .await?;
    Ok(provider)
}

/// A connection service backed by SQLite and a single fake provider.
pub struct ServiceFixture {
    pub db: Arc<DatabaseConnection>,
    pub service: ConnectionService,
    pub client: Arc<FakeVcsClient>,
    pub provider: VcsProvider,
}

impl ServiceFixture {
    pub async fn new() -> Result<Self> {
        Self::with_client(FakeVcsClient::new()).await
    }

    pub async fn with_client(client: FakeVcsClient) -> Result<Self> {
        let db = Arc::new(setup_test_db().await?);
        let provider = insert_provider(db.clone(), Cloud::GitHub).await?;
        let client = Arc::new(client);
        let resolver = StaticProviderResolver::new().with_provider(provider.clone(), client.clone());
        let service =
            ConnectionService::new(db.clone(), HookRepository::new(HOSTNAME), Arc::new(resolver));
        Ok(Self {
            db,
            service,
            client,
            provider,
        })
    }

    pub fn connect_opts(&self, resource_type: ResourceType, resource_id: &str) -> ConnectOptions {
        ConnectOptions {
            vcs_provider_id: self.provider.id,
            resource_type,
            resource_id: resource_id.to_string(),
            repo_identifier: REPO.to_string(),
        }
    }

    pub fn workspace(&self, resource_id: &str) -> ConnectOptions {
        self.connect_opts(ResourceType::Workspace, resource_id)
    }

    pub async fn hook_count(&self) -> Result<u64> {
        Ok(HookEntity::find().count(self.db.as_ref()).await?)
    }

    pub async fn connection_count(&self) -> Result<u64> {
        Ok(RepoConnectionEntity::find().count(self.db.as_ref()).await?)
    }
}

pub fn disconnect_workspace(resource_id: &str) -> DisconnectOptions {
    DisconnectOptions {
        resource_type: ResourceType::Workspace,
        resource_id: resource_id.to_string(),
    }
}
