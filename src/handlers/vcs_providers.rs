//! # VCS Providers API Handlers

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::repositories::vcs_provider::NewVcsProvider;
use crate::server::AppState;
use crate::vcs::{Cloud, VcsProvider};

/// Request body for registering VCS provider credentials
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVcsProviderRequest {
    pub name: String,
    pub organization: String,
    pub cloud: Cloud,
    /// API base URL for self-hosted installations
    pub api_base: Option<String>,
    /// API token; stored encrypted and never returned
    pub token: String,
}

/// Response returned after a provider is deleted
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteVcsProviderResponse {
    /// Number of resources disconnected
    pub disconnected: usize,
    /// Remote webhooks that could not be removed
    pub warnings: Vec<String>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        validation_error(
            "Invalid VCS provider id",
            serde_json::json!({ "id": "Must be a valid UUID" }),
        )
    })
}

/// Register a VCS provider
#[utoipa::path(
    post,
    path = "/vcs-providers",
    security(("bearer_auth" = [])),
    request_body = CreateVcsProviderRequest,
    responses(
        (status = 201, description = "Provider registered", body = VcsProvider),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "vcs-providers"
)]
pub async fn create_vcs_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<CreateVcsProviderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<VcsProvider>), ApiError> {
    let Json(request) = payload?;
    if request.name.trim().is_empty() || request.organization.trim().is_empty() {
        return Err(validation_error(
            "Validation failed",
            serde_json::json!({ "name": "required", "organization": "required" }),
        ));
    }

    let provider = state
        .providers
        .create(NewVcsProvider {
            name: request.name,
            organization: request.organization,
            cloud: request.cloud,
            api_base: request.api_base,
            token: request.token,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

/// Fetch a VCS provider
#[utoipa::path(
    get,
    path = "/vcs-providers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "VCS provider id")),
    responses(
        (status = 200, description = "Provider found", body = VcsProvider),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "vcs-providers"
)]
pub async fn get_vcs_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<VcsProvider>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.providers.get(id).await?))
}

/// Delete a VCS provider, disconnecting everything that uses it first
#[utoipa::path(
    delete,
    path = "/vcs-providers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "VCS provider id")),
    responses(
        (status = 200, description = "Provider deleted", body = DeleteVcsProviderResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "vcs-providers"
)]
pub async fn delete_vcs_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<DeleteVcsProviderResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.providers.get(id).await?;

    let report = state.connections.disconnect_provider(id).await?;
    state.providers.delete(id).await?;

    Ok(Json(DeleteVcsProviderResponse {
        disconnected: report.disconnected,
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    }))
}
