//! GitHub integration
//!
//! REST client for repository and webhook management plus the parser for
//! `X-GitHub-Event` deliveries.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::{EventParser, EventPayload, PullRequestAction, TagAction, VcsEvent, header_str};
use super::{
    Cloud, CreateWebhookOptions, DeleteWebhookOptions, EventType, GetWebhookOptions, Repository,
    UpdateWebhookOptions, VcsClient, VcsError, Webhook,
};
use crate::webhook_verification::{GITHUB_SIGNATURE_HEADER, verify_github_signature};

const USER_AGENT: &str = concat!("vcs-hooks/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";
const EVENT_HEADER: &str = "X-GitHub-Event";

/// GitHub REST API client authenticated with a personal or app token.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
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
            .header("Accept", ACCEPT)
    }
}

fn event_name(event: EventType) -> &'static str {
    match event {
        EventType::Push => "push",
        EventType::PullRequest => "pull_request",
    }
}

fn event_from_name(name: &str) -> Option<EventType> {
    match name {
        "push" => Some(EventType::Push),
        "pull_request" => Some(EventType::PullRequest),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct HookRequest<'a> {
    name: &'static str,
    active: bool,
    events: Vec<&'static str>,
    config: HookRequestConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookRequestConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    secret: &'a str,
    insecure_ssl: &'static str,
}

impl<'a> HookRequest<'a> {
    fn from_options(opts: &'a CreateWebhookOptions) -> Self {
        Self {
            name: "web",
            active: true,
            events: opts.events.iter().copied().map(event_name).collect(),
            config: HookRequestConfig {
                url: &opts.endpoint,
                content_type: "json",
                secret: &opts.secret,
                insecure_ssl: "0",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct HookResponse {
    id: u64,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    config: HookResponseConfig,
}

#[derive(Debug, Default, Deserialize)]
struct HookResponseConfig {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    full_name: String,
    default_branch: String,
}

#[async_trait]
impl VcsClient for GitHubClient {
    async fn get_repository(&self, identifier: &str) -> Result<Repository, VcsError> {
        let response = self
            .request(Method::GET, &format!("/repos/{identifier}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::from_response(response).await);
        }
        let repo: RepositoryResponse = response
            .json()
            .await
            .map_err(|e| VcsError::MalformedResponse(e.to_string()))?;
        Ok(Repository {
            identifier: repo.full_name,
            default_branch: repo.default_branch,
        })
    }

    async fn create_webhook(&self, opts: CreateWebhookOptions) -> Result<String, VcsError> {
        let response = self
            .request(Method::POST, &format!("/repos/{}/hooks", opts.repo))
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
        debug!(repo = %opts.repo, cloud_id = hook.id, "created GitHub webhook");
        Ok(hook.id.to_string())
    }

    async fn get_webhook(&self, opts: GetWebhookOptions) -> Result<Webhook, VcsError> {
        let response = self
            .request(
                Method::GET,
                &format!("/repos/{}/hooks/{}", opts.repo, opts.id),
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
            events: hook
                .events
                .iter()
                .filter_map(|name| event_from_name(name))
                .collect(),
            endpoint: hook.config.url.unwrap_or_default(),
        })
    }

    async fn update_webhook(&self, opts: UpdateWebhookOptions) -> Result<(), VcsError> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/repos/{}/hooks/{}", opts.webhook.repo, opts.id),
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
                &format!("/repos/{}/hooks/{}", opts.repo, opts.id),
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
struct RepositoryPayload {
    full_name: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
    sender: Option<UserPayload>,
    head_commit: Option<CommitPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEventPayload {
    action: String,
    number: u64,
    pull_request: PullRequestPayload,
    repository: RepositoryPayload,
    sender: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    head: HeadPayload,
    #[serde(default)]
    merged: bool,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

/// Parses GitHub deliveries after verifying `X-Hub-Signature-256`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitHubEventParser;

impl GitHubEventParser {
    fn parse_push(&self, body: &[u8], hook_id: Uuid) -> Option<VcsEvent> {
        let push: PushPayload = serde_json::from_slice(body)
            .map_err(|e| warn!(%hook_id, error = %e, "malformed GitHub push payload"))
            .ok()?;

        let payload = if let Some(tag) = push.git_ref.strip_prefix("refs/tags/") {
            EventPayload::Tag {
                tag: tag.to_string(),
                action: if push.deleted {
                    TagAction::Deleted
                } else {
                    TagAction::Created
                },
            }
        } else if let Some(branch) = push.git_ref.strip_prefix("refs/heads/") {
            if push.deleted {
                debug!(%hook_id, branch, "ignoring branch deletion");
                return None;
            }
            EventPayload::Push {
                branch: branch.to_string(),
            }
        } else {
            debug!(%hook_id, git_ref = %push.git_ref, "ignoring push to unsupported ref");
            return None;
        };

        Some(VcsEvent {
            hook_id,
            cloud: Cloud::GitHub,
            repo: push.repository.full_name,
            default_branch: push.repository.default_branch,
            commit_sha: push.after,
            commit_url: push.head_commit.and_then(|c| c.url),
            sender: push.sender.map(|s| s.login),
            received_at: Utc::now(),
            payload,
        })
    }

    fn parse_pull_request(&self, body: &[u8], hook_id: Uuid) -> Option<VcsEvent> {
        let event: PullRequestEventPayload = serde_json::from_slice(body)
            .map_err(|e| warn!(%hook_id, error = %e, "malformed GitHub pull_request payload"))
            .ok()?;

        let action = match event.action.as_str() {
            "opened" => PullRequestAction::Opened,
            "synchronize" => PullRequestAction::Updated,
            "reopened" => PullRequestAction::Reopened,
            "closed" if event.pull_request.merged => PullRequestAction::Merged,
            "closed" => PullRequestAction::Closed,
            other => {
                debug!(%hook_id, action = other, "ignoring pull request action");
                return None;
            }
        };

        Some(VcsEvent {
            hook_id,
            cloud: Cloud::GitHub,
            repo: event.repository.full_name,
            default_branch: event.repository.default_branch,
            commit_sha: event.pull_request.head.sha,
            commit_url: event.pull_request.html_url,
            sender: event.sender.map(|s| s.login),
            received_at: Utc::now(),
            payload: EventPayload::PullRequest {
                number: event.number,
                branch: event.pull_request.head.git_ref,
                action,
            },
        })
    }
}

impl EventParser for GitHubEventParser {
    fn parse(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        secret: &str,
        hook_id: Uuid,
    ) -> Option<VcsEvent> {
        let signature = header_str(headers, GITHUB_SIGNATURE_HEADER);
        if let Err(e) = verify_github_signature(body, signature, secret) {
            warn!(%hook_id, error = %e, "rejecting GitHub delivery");
            return None;
        }

        match header_str(headers, EVENT_HEADER) {
            "push" => self.parse_push(body, hook_id),
            "pull_request" => self.parse_pull_request(body, hook_id),
            other => {
                debug!(%hook_id, event = other, "ignoring GitHub event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook_verification::sign_github_payload;
    use axum::http::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(server.uri(), "test-token", Duration::from_secs(5)).unwrap()
    }

    fn desired() -> CreateWebhookOptions {
        CreateWebhookOptions {
            repo: "acme/infra".into(),
            secret: "s3cret".into(),
            events: vec![EventType::Push, EventType::PullRequest],
            endpoint: "https://hooks.example.com/webhooks/h1".into(),
        }
    }

    fn signed_headers(event: &str, body: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        headers.insert(
            GITHUB_SIGNATURE_HEADER,
            HeaderValue::from_str(&sign_github_payload(body, secret).unwrap()).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_create_webhook_posts_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/infra/hooks"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "name": "web",
                "events": ["push", "pull_request"],
                "config": {
                    "url": "https://hooks.example.com/webhooks/h1",
                    "secret": "s3cret",
                    "content_type": "json"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 999})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).create_webhook(desired()).await.unwrap();
        assert_eq!(id, "999");
    }

    #[tokio::test]
    async fn test_get_webhook_maps_events_and_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/infra/hooks/999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 999,
                "events": ["pull_request", "push", "issues"],
                "config": {"url": "https://hooks.example.com/webhooks/h1"}
            })))
            .mount(&server)
            .await;

        let hook = client(&server)
            .get_webhook(GetWebhookOptions {
                repo: "acme/infra".into(),
                id: "999".into(),
            })
            .await
            .unwrap();
        assert_eq!(hook.events, vec![EventType::PullRequest, EventType::Push]);
        assert_eq!(hook.endpoint, "https://hooks.example.com/webhooks/h1");
    }

    #[tokio::test]
    async fn test_get_webhook_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/infra/hooks/1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_webhook(GetWebhookOptions {
                repo: "acme/infra".into(),
                id: "1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound));
    }

    #[tokio::test]
    async fn test_update_and_delete_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/acme/infra/hooks/999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 999})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/acme/infra/hooks/999"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client
            .update_webhook(UpdateWebhookOptions {
                id: "999".into(),
                webhook: desired(),
            })
            .await
            .unwrap();
        client
            .delete_webhook(DeleteWebhookOptions {
                repo: "acme/infra".into(),
                id: "999".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_repository_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/infra"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "full_name": "acme/infra",
                "default_branch": "main"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/secret"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = client(&server);
        let repo = client.get_repository("acme/infra").await.unwrap();
        assert_eq!(repo.default_branch, "main");

        assert!(matches!(
            client.get_repository("acme/secret").await,
            Err(VcsError::Unauthorized { status: 401 })
        ));
        match client.get_repository("acme/broken").await {
            Err(VcsError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_push_event() {
        let hook_id = Uuid::new_v4();
        let body = serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "deleted": false,
            "repository": {"full_name": "acme/infra", "default_branch": "main"},
            "sender": {"login": "octocat"},
            "head_commit": {"url": "https://github.com/acme/infra/commit/abc123"}
        }))
        .unwrap();

        let event = GitHubEventParser
            .parse(&signed_headers("push", &body, "s3cret"), &body, "s3cret", hook_id)
            .unwrap();

        assert_eq!(event.hook_id, hook_id);
        assert_eq!(event.repo, "acme/infra");
        assert_eq!(event.commit_sha, "abc123");
        assert_eq!(event.sender.as_deref(), Some("octocat"));
        assert_eq!(
            event.payload,
            EventPayload::Push {
                branch: "main".into()
            }
        );
    }

    #[test]
    fn test_parse_tag_and_branch_deletion() {
        let tag = serde_json::to_vec(&json!({
            "ref": "refs/tags/v1.0.0",
            "after": "0000000000000000000000000000000000000000",
            "deleted": true,
            "repository": {"full_name": "acme/infra"}
        }))
        .unwrap();
        let event = GitHubEventParser
            .parse(&signed_headers("push", &tag, "k"), &tag, "k", Uuid::nil())
            .unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Tag {
                tag: "v1.0.0".into(),
                action: TagAction::Deleted
            }
        );

        let branch = serde_json::to_vec(&json!({
            "ref": "refs/heads/old",
            "after": "0000000000000000000000000000000000000000",
            "deleted": true,
            "repository": {"full_name": "acme/infra"}
        }))
        .unwrap();
        assert!(
            GitHubEventParser
                .parse(&signed_headers("push", &branch, "k"), &branch, "k", Uuid::nil())
                .is_none()
        );
    }

    #[test]
    fn test_parse_pull_request_actions() {
        let body = |action: &str, merged: bool| {
            serde_json::to_vec(&json!({
                "action": action,
                "number": 42,
                "pull_request": {"head": {"ref": "feature", "sha": "def456"}, "merged": merged},
                "repository": {"full_name": "acme/infra", "default_branch": "main"}
            }))
            .unwrap()
        };

        let cases = [
            ("opened", false, Some(PullRequestAction::Opened)),
            ("synchronize", false, Some(PullRequestAction::Updated)),
            ("closed", true, Some(PullRequestAction::Merged)),
            ("closed", false, Some(PullRequestAction::Closed)),
            ("labeled", false, None),
        ];
        for (action, merged, expected) in cases {
            let body = body(action, merged);
            let event = GitHubEventParser.parse(
                &signed_headers("pull_request", &body, "k"),
                &body,
                "k",
                Uuid::nil(),
            );
            let got = event.map(|e| match e.payload {
                EventPayload::PullRequest { action, number, .. } => {
                    assert_eq!(number, 42);
                    action
                }
                other => panic!("unexpected payload {other:?}"),
            });
            assert_eq!(got, expected, "action {action}");
        }
    }

    #[test]
    fn test_parse_rejects_bad_signature_and_ping() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let headers = signed_headers("ping", body, "k");
        assert!(GitHubEventParser.parse(&headers, body, "k", Uuid::nil()).is_none());

        let push = serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "after": "abc",
            "repository": {"full_name": "acme/infra"}
        }))
        .unwrap();
        let forged = signed_headers("push", &push, "attacker");
        assert!(GitHubEventParser.parse(&forged, &push, "k", Uuid::nil()).is_none());
    }
}
