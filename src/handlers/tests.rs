//! # Tests for Handlers
//!
//! Router-level tests driven through `tower::ServiceExt::oneshot` against an
//! in-memory SQLite database and the fake VCS client.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::repositories::VcsProviderRepository;
use crate::repositories::vcs_provider::NewVcsProvider;
use crate::server::{AppState, create_app};
use crate::telemetry::TRACE_ID_HEADER;
use crate::testing::{FakeVcsClient, StaticProviderResolver, VcsCall};
use crate::vcs::event::EventPayload;
use crate::vcs::{VcsEvent, VcsProvider};
use crate::webhook_verification::{GITHUB_SIGNATURE_HEADER, sign_github_payload};

const TOKEN: &str = "operator-token";

struct Harness {
    app: Router,
    state: AppState,
    db: Arc<DatabaseConnection>,
    client: Arc<FakeVcsClient>,
    provider: VcsProvider,
    events: mpsc::Receiver<VcsEvent>,
}

async fn harness_with(client: FakeVcsClient, buffer: usize) -> Harness {
    let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
    Migrator::up(db.as_ref(), None).await.unwrap();

    let config = Arc::new(AppConfig {
        operator_tokens: vec![TOKEN.to_string()],
        public_hostname: "otf.example.com".to_string(),
        ..Default::default()
    });
    let key = CryptoKey::new(vec![9u8; 32]).unwrap();
    let provider = VcsProviderRepository::new(db.clone(), key.clone())
        .create(NewVcsProvider {
            name: "github-acme".into(),
            organization: "acme".into(),
            cloud: crate::vcs::Cloud::GitHub,
            api_base: None,
            token: "ghp_test".into(),
        })
        .await
        .unwrap();

    let client = Arc::new(client);
    let resolver = StaticProviderResolver::new().with_provider(provider.clone(), client.clone());
    let (tx, events) = mpsc::channel(buffer);
    let state = AppState::new(config, db.clone(), key, Arc::new(resolver), tx);

    Harness {
        app: create_app(state.clone()),
        state,
        db,
        client,
        provider,
        events,
    }
}

async fn harness() -> Harness {
    harness_with(FakeVcsClient::new(), 8).await
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn connect_workspace(&self, workspace_id: &str) -> Value {
        let response = self
            .send(operator_json(
                "POST",
                "/connections",
                json!({
                    "vcs_provider_id": self.provider.id,
                    "resource_type": "workspace",
                    "resource_id": workspace_id,
                    "repo_identifier": "acme/infra"
                }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }
}

fn operator_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn operator(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn github_delivery(hook_id: &str, event: &str, body: &[u8], secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{hook_id}"))
        .header("X-GitHub-Event", event)
        .header(
            GITHUB_SIGNATURE_HEADER,
            sign_github_payload(body, secret).unwrap(),
        )
        .body(Body::from(body.to_vec()))
        .unwrap()
}

fn push_body() -> Vec<u8> {
    json!({
        "ref": "refs/heads/main",
        "after": "0123456789abcdef0123456789abcdef01234567",
        "repository": {"full_name": "acme/infra", "default_branch": "main"},
        "sender": {"login": "octocat"}
    })
    .to_string()
    .into_bytes()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_returns_service_info() {
    let h = harness().await;
    let response = h
        .send(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(&TRACE_ID_HEADER));
    let body = body_json(response).await;
    assert_eq!(body["service"], "vcs-hooks");
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let h = harness().await;
    let response = h
        .send(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_webhook_with_malformed_id_returns_422() {
    let mut h = harness().await;
    let response = h.send(github_delivery("not-a-uuid", "push", b"{}", "x")).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_webhook_for_unknown_hook_returns_404() {
    let mut h = harness().await;
    let response = h
        .send(github_delivery(&Uuid::new_v4().to_string(), "push", &push_body(), "x"))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_signed_push_forwards_exactly_one_event() {
    let mut h = harness().await;
    let connection = h.connect_workspace("ws-1").await;
    let hook_id: Uuid = connection["hook_id"].as_str().unwrap().parse().unwrap();
    let hook = h.state.hooks.get_hook(h.db.as_ref(), hook_id).await.unwrap();

    let response = h
        .send(github_delivery(&hook_id.to_string(), "push", &push_body(), &hook.secret))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let event = h.events.try_recv().unwrap();
    assert_eq!(event.hook_id, hook_id);
    assert_eq!(event.repo, "acme/infra");
    assert_eq!(
        event.payload,
        EventPayload::Push {
            branch: "main".into()
        }
    );
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_bad_signature_and_ping_are_acknowledged_but_dropped() {
    let mut h = harness().await;
    let connection = h.connect_workspace("ws-1").await;
    let hook_id = connection["hook_id"].as_str().unwrap().to_string();

    let forged = h
        .send(github_delivery(&hook_id, "push", &push_body(), "wrong-secret"))
        .await;
    assert_eq!(forged.status(), StatusCode::OK);

    let hook = h
        .state
        .hooks
        .get_hook(h.db.as_ref(), hook_id.parse().unwrap())
        .await
        .unwrap();
    let ping = h
        .send(github_delivery(&hook_id, "ping", b"{\"zen\":\"hi\"}", &hook.secret))
        .await;
    assert_eq!(ping.status(), StatusCode::OK);

    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_full_conduit_still_acknowledges() {
    let mut h = harness_with(FakeVcsClient::new(), 1).await;
    let connection = h.connect_workspace("ws-1").await;
    let hook_id = connection["hook_id"].as_str().unwrap().to_string();
    let hook = h
        .state
        .hooks
        .get_hook(h.db.as_ref(), hook_id.parse().unwrap())
        .await
        .unwrap();

    for _ in 0..2 {
        let response = h
            .send(github_delivery(&hook_id, "push", &push_body(), &hook.secret))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(h.events.try_recv().is_ok());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_operator_routes_require_bearer_token() {
    let h = harness().await;
    let response = h
        .send(
            Request::builder()
                .method("POST")
                .uri("/connections")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_connect_then_disconnect() {
    let h = harness().await;
    let connection = h.connect_workspace("ws-1").await;
    assert_eq!(connection["resource_type"], "workspace");
    assert_eq!(connection["resource_id"], "ws-1");
    assert_eq!(h.client.webhooks().len(), 1);

    let duplicate = h
        .send(operator_json(
            "POST",
            "/connections",
            json!({
                "vcs_provider_id": h.provider.id,
                "resource_type": "workspace",
                "resource_id": "ws-1",
                "repo_identifier": "acme/infra"
            }),
        ))
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let response = h.send(operator("DELETE", "/connections/workspace/ws-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("warning").is_none());
    assert!(h.client.webhooks().is_empty());

    let again = h.send(operator("DELETE", "/connections/workspace/ws-1")).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_unknown_repository_returns_404() {
    let h = harness_with(FakeVcsClient::new().with_missing_repository("acme/infra"), 8).await;
    let response = h
        .send(operator_json(
            "POST",
            "/connections",
            json!({
                "vcs_provider_id": h.provider.id,
                "resource_type": "module",
                "resource_id": "mod-1",
                "repo_identifier": "acme/infra"
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.client.count(|c| matches!(c, VcsCall::CreateWebhook(_))), 0);
}

#[tokio::test]
async fn test_disconnect_unknown_resource_type_returns_400() {
    let h = harness().await;
    let response = h.send(operator("DELETE", "/connections/project/p-1")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disconnect_surfaces_remote_failure_as_warning() {
    let h = harness_with(FakeVcsClient::new().fail_delete_webhook(500), 8).await;
    h.connect_workspace("ws-1").await;

    let response = h.send(operator("DELETE", "/connections/workspace/ws-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(
        body["warning"]
            .as_str()
            .unwrap()
            .contains("acme/infra")
    );
}

#[tokio::test]
async fn test_vcs_provider_lifecycle() {
    let h = harness().await;

    let created = h
        .send(operator_json(
            "POST",
            "/vcs-providers",
            json!({
                "name": "gitlab-acme",
                "organization": "acme",
                "cloud": "gitlab",
                "token": "glpat-secret"
            }),
        ))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let provider = body_json(created).await;
    assert_eq!(provider["cloud"], "gitlab");
    assert!(provider.get("token").is_none());
    let id = provider["id"].as_str().unwrap().to_string();

    let fetched = h.send(operator("GET", &format!("/vcs-providers/{id}"))).await;
    assert_eq!(fetched.status(), StatusCode::OK);

    let deleted = h.send(operator("DELETE", &format!("/vcs-providers/{id}"))).await;
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(body_json(deleted).await["disconnected"], 0);

    let missing = h.send(operator("GET", &format!("/vcs-providers/{id}"))).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = h.send(operator("GET", "/vcs-providers/nope")).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deleting_provider_disconnects_its_resources() {
    let h = harness().await;
    h.connect_workspace("ws-1").await;
    h.connect_workspace("ws-2").await;
    assert_eq!(h.client.webhooks().len(), 1);

    let response = h
        .send(operator("DELETE", &format!("/vcs-providers/{}", h.provider.id)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["disconnected"], 2);
    assert_eq!(body["warnings"], json!([]));
    assert!(h.client.webhooks().is_empty());
}
