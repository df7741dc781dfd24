//! VCS provider integration
//!
//! The [`VcsClient`] trait is the contract the hook engine consumes; one
//! implementation exists per supported [`Cloud`]. Inbound deliveries are
//! turned into normalized [`event::VcsEvent`]s by an [`event::EventParser`].

pub mod event;
pub mod github;
pub mod gitlab;
pub mod provider;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::HookError;

pub use event::{EventParser, EventParsers, VcsEvent};
pub use github::GitHubClient;
pub use gitlab::GitLabClient;

/// Supported source-control clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Cloud {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
}

impl Cloud {
    pub const ALL: [Cloud; 2] = [Cloud::GitHub, Cloud::GitLab];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cloud::GitHub => "github",
            Cloud::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cloud {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Cloud::GitHub),
            "gitlab" => Ok(Cloud::GitLab),
            other => Err(HookError::InvalidArgument(format!(
                "unsupported cloud '{other}'"
            ))),
        }
    }
}

/// Event categories a hook subscribes to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

/// The fixed subscription every hook converges towards.
pub const WEBHOOK_EVENTS: [EventType; 2] = [EventType::Push, EventType::PullRequest];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWebhookOptions {
    pub repo: String,
    pub secret: String,
    pub events: Vec<EventType>,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateWebhookOptions {
    pub id: String,
    pub webhook: CreateWebhookOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetWebhookOptions {
    pub repo: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteWebhookOptions {
    pub repo: String,
    pub id: String,
}

/// Webhook as currently registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub id: String,
    pub repo: String,
    pub events: Vec<EventType>,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub identifier: String,
    pub default_branch: String,
}

/// Errors returned by [`VcsClient`] implementations.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("resource not found")]
    NotFound,

    #[error("provider rejected credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl VcsError {
    /// Upstream HTTP status, when the provider answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            VcsError::NotFound => Some(404),
            VcsError::Unauthorized { status } | VcsError::Api { status, .. } => Some(*status),
            VcsError::Network(err) => err.status().map(|s| s.as_u16()),
            VcsError::MalformedResponse(_) => None,
        }
    }

    /// Maps a non-success response to an error, consuming the body for context.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        match status {
            404 => VcsError::NotFound,
            401 | 403 => VcsError::Unauthorized { status },
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message: String = body.chars().take(200).collect();
                VcsError::Api { status, message }
            }
        }
    }
}

/// Authenticated access to one provider's repository and webhook APIs.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Existence probe; `NotFound` when the repository is missing or hidden.
    async fn get_repository(&self, identifier: &str) -> Result<Repository, VcsError>;

    /// Registers a webhook and returns the provider-assigned id.
    async fn create_webhook(&self, opts: CreateWebhookOptions) -> Result<String, VcsError>;

    async fn get_webhook(&self, opts: GetWebhookOptions) -> Result<Webhook, VcsError>;

    async fn update_webhook(&self, opts: UpdateWebhookOptions) -> Result<(), VcsError>;

    async fn delete_webhook(&self, opts: DeleteWebhookOptions) -> Result<(), VcsError>;
}

/// Non-secret view of a stored VCS provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VcsProvider {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
    pub organization: String,
    pub cloud: Cloud,
    pub api_base: Option<String>,
}

/// Looks up providers and hands out authenticated clients for them.
#[async_trait]
pub trait VcsProviderResolver: Send + Sync {
    async fn get_vcs_provider(&self, id: Uuid) -> Result<VcsProvider, HookError>;

    async fn get_vcs_client(&self, id: Uuid) -> Result<Arc<dyn VcsClient>, HookError>;
}

/// Splits `owner/name` (GitLab allows nested groups in the owner part).
pub fn split_repo_identifier(identifier: &str) -> Result<(&str, &str), HookError> {
    match identifier.rsplit_once('/') {
        Some((owner, name))
            if !owner.is_empty()
                && !name.is_empty()
                && !owner.starts_with('/')
                && !owner.ends_with('/')
                && !owner.contains("//") =>
        {
            Ok((owner, name))
        }
        _ => Err(HookError::InvalidArgument(format!(
            "repository identifier '{identifier}' must be of the form owner/name"
        ))),
    }
}
