//! # Connection Service
//!
//! Connect and Disconnect keep three stores in step: the hook tables, the
//! provider's webhook registry, and the callback endpoint. The check-then-act
//! span of each runs under an exclusive lock on the hook tables so replicas
//! sharing a database serialize against each other.

use std::sync::Arc;

use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{HOOK_TABLES, lock_tables};
use crate::error::{DisconnectWarning, HookError};
use crate::hook::{Hook, SyncOutcome};
use crate::repositories::connection::{
    self, Connection, ResourceType, count_connections, create_connection, delete_connection,
    find_connection,
};
use crate::repositories::HookRepository;
use crate::vcs::{VcsError, VcsProviderResolver};

/// Request to connect one resource to a repository.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConnectOptions {
    #[schema(value_type = String)]
    pub vcs_provider_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Repository path, e.g. `owner/name`
    pub repo_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOptions {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

/// Result of [`ConnectionService::disconnect_provider`].
#[derive(Debug, Default)]
pub struct ProviderDisconnectReport {
    pub disconnected: usize,
    /// Remote cleanups that failed; local state is already consistent.
    pub warnings: Vec<DisconnectWarning>,
}

#[derive(Clone)]
pub struct ConnectionService {
    db: Arc<DatabaseConnection>,
    hooks: HookRepository,
    providers: Arc<dyn VcsProviderResolver>,
}

impl ConnectionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        hooks: HookRepository,
        providers: Arc<dyn VcsProviderResolver>,
    ) -> Self {
        Self {
            db,
            hooks,
            providers,
        }
    }

    pub fn hooks(&self) -> &HookRepository {
        &self.hooks
    }

    pub async fn connect(&self, opts: ConnectOptions) -> Result<Connection, HookError> {
        self.connect_in(self.db.as_ref(), opts).await
    }

    /// Connects a resource, joining `conn`'s transaction when it is one.
    ///
    /// Provider resolution and the repository probe run before the lock is
    /// taken. Any failure after that rolls back every row this call wrote.
    #[instrument(
        skip_all,
        fields(
            vcs_provider_id = %opts.vcs_provider_id,
            resource_type = %opts.resource_type,
            resource_id = %opts.resource_id,
            repo = %opts.repo_identifier,
        )
    )]
    pub async fn connect_in<C: TransactionTrait>(
        &self,
        conn: &C,
        opts: ConnectOptions,
    ) -> Result<Connection, HookError> {
        if opts.resource_id.trim().is_empty() {
            return Err(HookError::InvalidArgument("resource_id must not be empty".into()));
        }

        let provider = self.providers.get_vcs_provider(opts.vcs_provider_id).await?;
        let client = self.providers.get_vcs_client(opts.vcs_provider_id).await?;

        client
            .get_repository(&opts.repo_identifier)
            .await
            .map_err(|e| match e {
                VcsError::NotFound => {
                    HookError::not_found(format!("repository {}", opts.repo_identifier))
                }
                other => HookError::vcs("probing repository")(other),
            })?;

        let candidate = Hook::new(&opts.repo_identifier, provider.cloud, self.hooks.hostname())?;

        let txn = conn
            .begin()
            .await
            .map_err(HookError::database("beginning transaction"))?;
        lock_tables(&txn, &HOOK_TABLES)
            .await
            .map_err(HookError::database("locking hook tables"))?;

        // checked before sync so a rejected request never registers a webhook
        if find_connection(&txn, opts.resource_type, &opts.resource_id)
            .await?
            .is_some()
        {
            return Err(HookError::AlreadyExists(format!(
                "{} {} is already connected",
                opts.resource_type, opts.resource_id
            )));
        }

        let mut hook = self.hooks.get_or_create_hook(&txn, candidate).await?;
        let known_cloud_id = hook.cloud_id.clone();

        let outcome = hook
            .sync(client.as_ref())
            .await
            .map_err(HookError::vcs("syncing webhook"))?;

        let persisted = async {
            if hook.cloud_id != known_cloud_id
                && let Some(cloud_id) = hook.cloud_id.as_deref()
            {
                self.hooks.update_cloud_id(&txn, hook.id, cloud_id).await?;
            }

            let connection = create_connection(
                &txn,
                hook.id,
                opts.vcs_provider_id,
                opts.resource_type,
                &opts.resource_id,
            )
            .await?;

            txn.commit()
                .await
                .map_err(HookError::database("committing connect"))?;
            Ok::<_, HookError>(connection)
        }
        .await;

        let connection = match persisted {
            Ok(connection) => connection,
            Err(e) => {
                // a recreated webhook still serves the surviving hook row
                if outcome == SyncOutcome::Created
                    && let Some(opts) = hook.delete_options()
                {
                    if let Err(cleanup) = client.delete_webhook(opts).await {
                        counter!("vcs_hooks_remote_cleanup_failed_total").increment(1);
                        warn!(
                            hook_id = %hook.id,
                            cloud_id = ?hook.cloud_id,
                            error = %cleanup,
                            "failed to remove webhook registered by aborted connect"
                        );
                    }
                }
                return Err(e);
            }
        };

        counter!("vcs_hooks_connect_total", "cloud" => provider.cloud.as_str()).increment(1);
        if outcome != SyncOutcome::Unchanged {
            counter!("vcs_hooks_webhook_reconciled_total", "outcome" => outcome_label(outcome))
                .increment(1);
        }
        info!(hook_id = %hook.id, ?outcome, "resource connected");

        Ok(connection)
    }

    pub async fn disconnect(&self, opts: DisconnectOptions) -> Result<(), HookError> {
        self.disconnect_in(self.db.as_ref(), opts).await
    }

    /// Removes a resource's connection, deleting the hook once unreferenced.
    ///
    /// The remote webhook is deleted after the local transaction commits. A
    /// failure there is returned as [`HookError::Warning`]; local rows stay
    /// deleted.
    #[instrument(
        skip_all,
        fields(resource_type = %opts.resource_type, resource_id = %opts.resource_id)
    )]
    pub async fn disconnect_in<C: TransactionTrait>(
        &self,
        conn: &C,
        opts: DisconnectOptions,
    ) -> Result<(), HookError> {
        let txn = conn
            .begin()
            .await
            .map_err(HookError::database("beginning transaction"))?;
        lock_tables(&txn, &HOOK_TABLES)
            .await
            .map_err(HookError::database("locking hook tables"))?;

        let (hook_id, vcs_provider_id) =
            delete_connection(&txn, opts.resource_type, &opts.resource_id).await?;

        let remaining = count_connections(&txn, hook_id).await?;
        if remaining > 0 {
            txn.commit()
                .await
                .map_err(HookError::database("committing disconnect"))?;
            counter!("vcs_hooks_disconnect_total", "hook_deleted" => "false").increment(1);
            debug!(%hook_id, remaining, "hook still referenced");
            return Ok(());
        }

        let hook = self.hooks.delete_hook(&txn, hook_id).await?;
        txn.commit()
            .await
            .map_err(HookError::database("committing disconnect"))?;
        counter!("vcs_hooks_disconnect_total", "hook_deleted" => "true").increment(1);
        info!(%hook_id, repo = %hook.repo_identifier, "last connection removed, hook deleted");

        self.delete_remote_webhook(&hook, vcs_provider_id).await
    }

    async fn delete_remote_webhook(
        &self,
        hook: &Hook,
        vcs_provider_id: Uuid,
    ) -> Result<(), HookError> {
        let Some(opts) = hook.delete_options() else {
            return Ok(());
        };

        let result = match self.providers.get_vcs_client(vcs_provider_id).await {
            Ok(client) => client
                .delete_webhook(opts)
                .await
                .map_err(HookError::vcs("deleting webhook")),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(HookError::Vcs {
                source: VcsError::NotFound,
                ..
            }) => {
                debug!(hook_id = %hook.id, "remote webhook already gone");
                Ok(())
            }
            Err(source) => {
                counter!("vcs_hooks_remote_cleanup_failed_total").increment(1);
                warn!(
                    hook_id = %hook.id,
                    repo = %hook.repo_identifier,
                    cloud_id = ?hook.cloud_id,
                    error = %source,
                    "remote webhook left behind"
                );
                Err(DisconnectWarning {
                    hook_id: hook.id,
                    repo_identifier: hook.repo_identifier.clone(),
                    cloud_id: hook.cloud_id.clone(),
                    source: Box::new(source),
                }
                .into())
            }
        }
    }

    /// Disconnects every resource connected through `vcs_provider_id`.
    ///
    /// Warnings are collected; any other error stops the sweep.
    #[instrument(skip(self))]
    pub async fn disconnect_provider(
        &self,
        vcs_provider_id: Uuid,
    ) -> Result<ProviderDisconnectReport, HookError> {
        let connections = connection::list_by_vcs_provider(self.db.as_ref(), vcs_provider_id).await?;
        let mut report = ProviderDisconnectReport::default();

        for conn in connections {
            let opts = DisconnectOptions {
                resource_type: conn.resource_type,
                resource_id: conn.resource_id,
            };
            match self.disconnect(opts).await {
                Ok(()) => report.disconnected += 1,
                Err(HookError::Warning(warning)) => {
                    report.disconnected += 1;
                    report.warnings.push(warning);
                }
                // disconnected concurrently
                Err(HookError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            disconnected = report.disconnected,
            warnings = report.warnings.len(),
            "vcs provider connections removed"
        );
        Ok(report)
    }

    /// Deletes hooks that no connection references any more.
    ///
    /// Such hooks have no provider to reach, so their remote webhooks are
    /// only reported.
    #[instrument(skip(self))]
    pub async fn delete_unreferenced_hooks(&self) -> Result<Vec<Hook>, HookError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(HookError::database("beginning transaction"))?;
        lock_tables(&txn, &HOOK_TABLES)
            .await
            .map_err(HookError::database("locking hook tables"))?;

        let orphans = self.hooks.list_unreferenced(&txn).await?;
        for hook in &orphans {
            self.hooks.delete_hook(&txn, hook.id).await?;
        }
        txn.commit()
            .await
            .map_err(HookError::database("committing hook purge"))?;

        for hook in &orphans {
            if let Some(cloud_id) = &hook.cloud_id {
                counter!("vcs_hooks_remote_cleanup_failed_total").increment(1);
                warn!(
                    hook_id = %hook.id,
                    repo = %hook.repo_identifier,
                    cloud = %hook.cloud,
                    cloud_id = %cloud_id,
                    "purged unreferenced hook; remote webhook must be removed manually"
                );
            }
        }
        if !orphans.is_empty() {
            counter!("vcs_hooks_purged_total").increment(orphans.len() as u64);
            info!(purged = orphans.len(), "unreferenced hooks purged");
        }
        Ok(orphans)
    }
}

fn outcome_label(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Created => "created",
        SyncOutcome::Recreated => "recreated",
        SyncOutcome::Updated => "updated",
        SyncOutcome::Unchanged => "unchanged",
    }
}
