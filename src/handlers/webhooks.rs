//! # Webhook Handler
//!
//! Public endpoint the VCS providers call back. The path carries the hook's
//! internal id, so re-registering a webhook never changes its URL.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use metrics::counter;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;
use crate::vcs::VcsEvent;

/// Receive a webhook delivery for a registered hook
#[utoipa::path(
    post,
    path = "/webhooks/{webhook_id}",
    params(
        ("webhook_id" = String, Path, description = "Internal hook identifier (UUID)"),
        ("X-Hub-Signature-256" = Option<String>, Header, description = "GitHub HMAC-SHA256 signature"),
        ("X-Gitlab-Token" = Option<String>, Header, description = "GitLab shared secret token"),
    ),
    request_body(content = String, description = "Raw provider payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted or ignored"),
        (status = 404, description = "No hook with this id", body = ApiError),
        (status = 422, description = "Malformed webhook id", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&webhook_id).map_err(|_| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_WEBHOOK_ID",
            "Webhook id must be a UUID",
        )
    })?;

    let hook = state
        .hooks
        .find_hook(state.db.as_ref(), id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Webhook not found"))?;

    let Some(parser) = state.parsers.get(hook.cloud) else {
        warn!(hook_id = %hook.id, cloud = %hook.cloud, "no event parser registered for cloud");
        return Ok(StatusCode::OK);
    };

    match parser.parse(&headers, &body, &hook.secret, hook.id) {
        Some(event) => forward(&state, event),
        None => {
            counter!("vcs_hooks_deliveries_ignored_total", "cloud" => hook.cloud.as_str())
                .increment(1);
            debug!(hook_id = %hook.id, "delivery ignored");
        }
    }

    Ok(StatusCode::OK)
}

fn forward(state: &AppState, event: VcsEvent) {
    let hook_id = event.hook_id;
    let cloud = event.cloud.as_str();
    match state.events.try_send(event) {
        Ok(()) => {
            counter!("vcs_hooks_events_forwarded_total", "cloud" => cloud).increment(1);
        }
        Err(TrySendError::Full(_)) => {
            counter!("vcs_hooks_events_dropped_total", "reason" => "full").increment(1);
            warn!(%hook_id, "event conduit full, event dropped");
        }
        Err(TrySendError::Closed(_)) => {
            counter!("vcs_hooks_events_dropped_total", "reason" => "closed").increment(1);
            warn!(%hook_id, "event conduit closed, event dropped");
        }
    }
}
