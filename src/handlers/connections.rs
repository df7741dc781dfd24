//! # Connections API Handlers
//!
//! Operator endpoints that connect resources to repositories and disconnect
//! them again.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, HookError};
use crate::repositories::{Connection, ResourceType};
use crate::server::AppState;
use crate::service::{ConnectOptions, DisconnectOptions};

/// Response returned after a disconnect
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Set when the remote webhook could not be removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Connect a workspace or module to a repository
#[utoipa::path(
    post,
    path = "/connections",
    security(("bearer_auth" = [])),
    request_body = ConnectOptions,
    responses(
        (status = 201, description = "Resource connected", body = Connection),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "VCS provider or repository not found", body = ApiError),
        (status = 409, description = "Resource already connected", body = ApiError),
        (status = 422, description = "VCS provider credentials unusable", body = ApiError),
        (status = 502, description = "VCS provider rejected the request", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<ConnectOptions>, JsonRejection>,
) -> Result<(StatusCode, Json<Connection>), ApiError> {
    let Json(opts) = payload?;
    let connection = state.connections.connect(opts).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

/// Disconnect a resource from its repository
#[utoipa::path(
    delete,
    path = "/connections/{resource_type}/{resource_id}",
    security(("bearer_auth" = [])),
    params(
        ("resource_type" = String, Path, description = "`workspace` or `module`"),
        ("resource_id" = String, Path, description = "Resource identifier")
    ),
    responses(
        (status = 200, description = "Resource disconnected, possibly with a warning", body = DisconnectResponse),
        (status = 400, description = "Unknown resource type", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Resource is not connected", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let resource_type: ResourceType = resource_type.parse()?;
    let opts = DisconnectOptions {
        resource_type,
        resource_id: resource_id.clone(),
    };

    let warning = match state.connections.disconnect(opts).await {
        Ok(()) => None,
        Err(HookError::Warning(warning)) => Some(warning.to_string()),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(DisconnectResponse {
        resource_type,
        resource_id,
        warning,
    }))
}
