//! Normalized VCS events and the per-cloud parsers that produce them.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Cloud;
use super::github::GitHubEventParser;
use super::gitlab::GitLabEventParser;

/// An event forwarded to downstream consumers once a delivery is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VcsEvent {
    pub hook_id: Uuid,
    pub cloud: Cloud,
    pub repo: String,
    pub default_branch: Option<String>,
    pub commit_sha: String,
    pub commit_url: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Push {
        branch: String,
    },
    Tag {
        tag: String,
        action: TagAction,
    },
    PullRequest {
        number: u64,
        branch: String,
        action: PullRequestAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagAction {
    Created,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Updated,
    Closed,
    Merged,
    Reopened,
}

/// Turns one raw delivery into an event.
///
/// Returns `None` for anything that should be acknowledged but dropped:
/// failed verification, pings, unsupported event types or actions.
pub trait EventParser: Send + Sync {
    fn parse(&self, headers: &HeaderMap, body: &[u8], secret: &str, hook_id: Uuid)
    -> Option<VcsEvent>;
}

/// Parser registry keyed by cloud.
#[derive(Clone)]
pub struct EventParsers {
    parsers: HashMap<Cloud, Arc<dyn EventParser>>,
}

impl EventParsers {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registers (or replaces) the parser for `cloud`.
    pub fn with_parser(mut self, cloud: Cloud, parser: Arc<dyn EventParser>) -> Self {
        self.parsers.insert(cloud, parser);
        self
    }

    pub fn get(&self, cloud: Cloud) -> Option<&Arc<dyn EventParser>> {
        self.parsers.get(&cloud)
    }
}

impl Default for EventParsers {
    /// Registry with the built-in parser for every supported cloud.
    fn default() -> Self {
        Self::new()
            .with_parser(Cloud::GitHub, Arc::new(GitHubEventParser))
            .with_parser(Cloud::GitLab, Arc::new(GitLabEventParser))
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
