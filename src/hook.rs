//! Hook entity and webhook reconciliation
//!
//! A [`Hook`] is the single webhook shared by every resource connected to
//! one repository. It is plain data; [`Hook::sync`] converges the provider's
//! registration towards [`WEBHOOK_EVENTS`] and the hook's callback endpoint.

use std::collections::BTreeSet;

use rand::RngCore;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::HookError;
use crate::models::hook::Model as HookModel;
use crate::vcs::{
    Cloud, CreateWebhookOptions, DeleteWebhookOptions, EventType, GetWebhookOptions,
    UpdateWebhookOptions, VcsClient, VcsError, WEBHOOK_EVENTS, Webhook, split_repo_identifier,
};

const SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub id: Uuid,
    /// Provider-assigned webhook id; `None` until registration succeeds.
    pub cloud_id: Option<String>,
    pub secret: String,
    pub repo_identifier: String,
    pub cloud: Cloud,
    /// Callback URL; embeds `id`, never `cloud_id`.
    pub endpoint: String,
}

/// What [`Hook::sync`] had to do to converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No webhook was registered; one was created.
    Created,
    /// The registered webhook had disappeared; a new one was created.
    Recreated,
    /// The registered webhook drifted and was updated in place.
    Updated,
    Unchanged,
}

/// Builds `https://{hostname}/webhooks/{id}`.
///
/// `hostname` must be a bare `host[:port]`; the route is served at the root,
/// so a path, query or credentials would yield an unreachable endpoint.
pub fn webhook_endpoint(hostname: &str, id: Uuid) -> Result<String, HookError> {
    let invalid = |reason: &str| {
        HookError::InvalidArgument(format!("invalid hostname '{hostname}': {reason}"))
    };

    let mut url = Url::parse(&format!("https://{}", hostname.trim().trim_end_matches('/')))
        .map_err(|e| invalid(&e.to_string()))?;
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not contain a path"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("must not contain credentials"));
    }

    url.set_path(&format!("/webhooks/{id}"));
    Ok(url.to_string())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn events_match(actual: &[EventType], desired: &[EventType]) -> bool {
    actual.iter().collect::<BTreeSet<_>>() == desired.iter().collect::<BTreeSet<_>>()
}

impl Hook {
    /// Candidate hook for `repo_identifier`, not yet persisted.
    pub fn new(repo_identifier: &str, cloud: Cloud, hostname: &str) -> Result<Self, HookError> {
        split_repo_identifier(repo_identifier)?;
        let id = Uuid::new_v4();
        Ok(Self {
            id,
            cloud_id: None,
            secret: generate_secret(),
            repo_identifier: repo_identifier.to_string(),
            cloud,
            endpoint: webhook_endpoint(hostname, id)?,
        })
    }

    /// Rehydrates a persisted hook; the endpoint is derived, not stored.
    pub fn from_model(model: HookModel, hostname: &str) -> Result<Self, HookError> {
        let cloud = model.cloud.parse()?;
        Ok(Self {
            endpoint: webhook_endpoint(hostname, model.id)?,
            id: model.id,
            cloud_id: model.cloud_id,
            secret: model.secret,
            repo_identifier: model.repo_identifier,
            cloud,
        })
    }

    fn desired(&self) -> CreateWebhookOptions {
        CreateWebhookOptions {
            repo: self.repo_identifier.clone(),
            secret: self.secret.clone(),
            events: WEBHOOK_EVENTS.to_vec(),
            endpoint: self.endpoint.clone(),
        }
    }

    fn matches(&self, actual: &Webhook) -> bool {
        events_match(&actual.events, &WEBHOOK_EVENTS) && actual.endpoint == self.endpoint
    }

    /// Options to remove this hook's registration, if it has one.
    pub fn delete_options(&self) -> Option<DeleteWebhookOptions> {
        self.cloud_id.as_ref().map(|id| DeleteWebhookOptions {
            repo: self.repo_identifier.clone(),
            id: id.clone(),
        })
    }

    /// Reconciles the provider-side webhook with the desired subscription.
    ///
    /// Only `cloud_id` is ever modified locally. Errors other than a
    /// `NotFound` from the lookup are returned unchanged.
    pub async fn sync(&mut self, client: &dyn VcsClient) -> Result<SyncOutcome, VcsError> {
        let Some(cloud_id) = self.cloud_id.clone() else {
            let created = client.create_webhook(self.desired()).await?;
            info!(hook_id = %self.id, repo = %self.repo_identifier, cloud_id = %created, "registered webhook");
            self.cloud_id = Some(created);
            return Ok(SyncOutcome::Created);
        };

        let lookup = client
            .get_webhook(GetWebhookOptions {
                repo: self.repo_identifier.clone(),
                id: cloud_id.clone(),
            })
            .await;

        match lookup {
            Err(VcsError::NotFound) => {
                let created = client.create_webhook(self.desired()).await?;
                info!(
                    hook_id = %self.id,
                    repo = %self.repo_identifier,
                    old_cloud_id = %cloud_id,
                    cloud_id = %created,
                    "webhook missing upstream, re-registered"
                );
                self.cloud_id = Some(created);
                Ok(SyncOutcome::Recreated)
            }
            Err(e) => Err(e),
            Ok(actual) if self.matches(&actual) => {
                debug!(hook_id = %self.id, cloud_id = %cloud_id, "webhook in sync");
                Ok(SyncOutcome::Unchanged)
            }
            Ok(_) => {
                client
                    .update_webhook(UpdateWebhookOptions {
                        id: cloud_id.clone(),
                        webhook: self.desired(),
                    })
                    .await?;
                info!(hook_id = %self.id, cloud_id = %cloud_id, "webhook drifted, updated");
                Ok(SyncOutcome::Updated)
            }
        }
    }
}
