//! GitLab integration
//!
//! REST v4 client for project hooks plus the parser for `X-Gitlab-Event`
//! deliveries. GitLab echoes the hook secret verbatim in `X-Gitlab-Token`.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::form_urlencoded;
use uuid::Uuid;

use super::event::{EventParser, EventPayload, PullRequestAction, TagAction, VcsEvent, header_str};
use super::{
    Cloud, CreateWebhookOptions, DeleteWebhookOptions, EventType, GetWebhookOptions, Repository,
    UpdateWebhookOptions, VcsClient, VcsError, Webhook,
};
use crate::webhook_verification::{GITLAB_TOKEN_HEADER, verify_gitlab_token};

const USER_AGENT: &str = concat!("vcs-hooks/", env!("CARGO_PKG_VERSION"));
const EVENT_HEADER: &str = "X-Gitlab-Event";
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// GitLab REST API client; `api_base` includes the `/api/v4` suffix.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitLabClient {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VcsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
    }
}

/// Projects are addressed by their URL-encoded full path.
fn project_path(identifier: &str) -> String {
    form_urlencoded::byte_serialize(identifier.as_bytes()).collect()
}

#[derive(Debug, Serialize)]
struct HookRequest<'a> {
    url: &'a str,
    token: &'a str,
    push_events: bool,
    tag_push_events: bool,
    merge_requests_events: bool,
    enable_ssl_verification: bool,
}

impl<'a> HookRequest<'a> {
    fn from_options(opts: &'a CreateWebhookOptions) -> Self {
        let push = opts.events.contains(&EventType::Push);
        Self {
            url: &opts.endpoint,
            token: &opts.secret,
            push_events: push,
            tag_push_events: push,
            merge_requests_events: opts.events.contains(&EventType::PullRequest),
            enable_ssl_verification: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HookResponse {
    id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    push_events: bool,
    #[serde(default)]
    merge_requests_events: bool,
}

impl HookResponse {
    fn events(&self) -> Vec<EventType> {
        let mut events = Vec::with_capacity(2);
        if self.push_events {
            events.push(EventType::Push);
        }
        if self.merge_requests_events {
            events.push(EventType::PullRequest);
        }
        events
    }
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    path_with_namespace: String,
    #[serde(default)]
    default_branch: Option<String>,
}

#[async_trait]
impl VcsClient for GitLabClient {
    async fn get_repository(&self, identifier: &str) -> Result<Repository, VcsError> {
        let response = self
            .request(
                Method::GET,
                &format!("/projects/{}", project_path(identifier)),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        let project: ProjectResponse = response
            .json()
            .await
            .map_err(|e| VcsError::MalformedResponse(e.to_string()))?;
        Ok(Repository {
            identifier: project.path_with_namespace,
            default_branch: project.default_branch.unwrap_or_else(|| "main".to_string()),
        })
    }

    async fn create_webhook(&self, opts: CreateWebhookOptions) -> Result<String, VcsError> {
        let response = self
            .request(
                Method::POST,
                &format!("/projects/{}/hooks", project_path(&opts.repo)),
            )
            .json(&HookRequest::from_options(&opts))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        let hook: HookResponse = response
            .json()
            .await
            .map_err(|e| VcsError::MalformedResponse(e.to_string()))?;
        debug!(repo = %opts.repo, cloud_id = hook.id, "created GitLab project hook");
        Ok(hook.id.to_string())
    }

    async fn get_webhook(&self, opts: GetWebhookOptions) -> Result<Webhook, VcsError> {
        let response = self
            .request(
                Method::GET,
                &format!("/projects/{}/hooks/{}", project_path(&opts.repo), opts.id),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        let hook: HookResponse = response
            .json()
            .await
            .map_err(|e| VcsError::MalformedResponse(e.to_string()))?;
        Ok(Webhook {
            id: hook.id.to_string(),
            repo: opts.repo,
            events: hook.events(),
            endpoint: hook.url,
        })
    }

    async fn update_webhook(&self, opts: UpdateWebhookOptions) -> Result<(), VcsError> {
        let response = self
            .request(
                Method::PUT,
                &format!(
                    "/projects/{}/hooks/{}",
                    project_path(&opts.webhook.repo),
                    opts.id
                ),
            )
            .json(&HookRequest::from_options(&opts.webhook))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        Ok(())
    }

    async fn delete_webhook(&self, opts: DeleteWebhookOptions) -> Result<(), VcsError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/projects/{}/hooks/{}", project_path(&opts.repo), opts.id),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ProjectPayload {
    path_with_namespace: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    before: String,
    after: String,
    checkout_sha: Option<String>,
    user_username: Option<String>,
    project: ProjectPayload,
}

#[derive(Debug, Deserialize)]
struct MergeRequestPayload {
    user: Option<UserPayload>,
    project: ProjectPayload,
    object_attributes: MergeRequestAttributes,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    username: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestAttributes {
    iid: u64,
    source_branch: String,
    action: Option<String>,
    url: Option<String>,
    last_commit: LastCommit,
}

#[derive(Debug, Deserialize)]
struct LastCommit {
    id: String,
}

/// Parses GitLab deliveries after checking `X-Gitlab-Token`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitLabEventParser;

impl GitLabEventParser {
    fn parse_push(&self, body: &[u8], hook_id: Uuid, tag: bool) -> Option<VcsEvent> {
        let push: PushPayload = serde_json::from_slice(body)
            .map_err(|e| warn!(%hook_id, error = %e, "malformed GitLab push payload"))
            .ok()?;

        let payload = if tag {
            let name = push.git_ref.strip_prefix("refs/tags/")?.to_string();
            let action = if push.after == NULL_SHA {
                TagAction::Deleted
            } else {
                TagAction::Created
            };
            EventPayload::Tag { tag: name, action }
        } else {
            let branch = push.git_ref.strip_prefix("refs/heads/")?.to_string();
            if push.after == NULL_SHA {
                debug!(%hook_id, branch, "ignoring branch deletion");
                return None;
            }
            EventPayload::Push { branch }
        };

        let commit_sha = push
            .checkout_sha
            .filter(|sha| !sha.is_empty())
            .unwrap_or(if push.after == NULL_SHA {
                push.before
            } else {
                push.after
            });

        Some(VcsEvent {
            hook_id,
            cloud: Cloud::GitLab,
            repo: push.project.path_with_namespace,
            default_branch: push.project.default_branch,
            commit_sha,
            commit_url: None,
            sender: push.user_username,
            received_at: Utc::now(),
            payload,
        })
    }

    fn parse_merge_request(&self, body: &[u8], hook_id: Uuid) -> Option<VcsEvent> {
        let mr: MergeRequestPayload = serde_json::from_slice(body)
            .map_err(|e| warn!(%hook_id, error = %e, "malformed GitLab merge request payload"))
            .ok()?;

        let action = match mr.object_attributes.action.as_deref() {
            Some("open") => PullRequestAction::Opened,
            Some("update") => PullRequestAction::Updated,
            Some("reopen") => PullRequestAction::Reopened,
            Some("merge") => PullRequestAction::Merged,
            Some("close") => PullRequestAction::Closed,
            other => {
                debug!(%hook_id, action = ?other, "ignoring merge request action");
                return None;
            }
        };

        Some(VcsEvent {
            hook_id,
            cloud: Cloud::GitLab,
            repo: mr.project.path_with_namespace,
            default_branch: mr.project.default_branch,
            commit_sha: mr.object_attributes.last_commit.id,
            commit_url: mr.object_attributes.url,
            sender: mr.user.map(|u| u.username),
            received_at: Utc::now(),
            payload: EventPayload::PullRequest {
                number: mr.object_attributes.iid,
                branch: mr.object_attributes.source_branch,
                action,
            },
        })
    }
}

impl EventParser for GitLabEventParser {
    fn parse(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        secret: &str,
        hook_id: Uuid,
    ) -> Option<VcsEvent> {
        if let Err(e) = verify_gitlab_token(header_str(headers, GITLAB_TOKEN_HEADER), secret) {
            warn!(%hook_id, error = %e, "rejecting GitLab delivery");
            return None;
        }

        match header_str(headers, EVENT_HEADER) {
            "Push Hook" => self.parse_push(body, hook_id, false),
            "Tag Push Hook" => self.parse_push(body, hook_id, true),
            "Merge Request Hook" => self.parse_merge_request(body, hook_id),
            other => {
                debug!(%hook_id, event = other, "ignoring GitLab event");
                None
            }
        }
    }
}
