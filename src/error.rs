//! # Error Handling
//!
//! [`HookError`] is the taxonomy returned by the hook engine; [`ApiError`]
//! renders any error as problem+json with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::telemetry;
use crate::vcs::VcsError;

/// Errors produced by hook and connection operations.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid credentials for vcs provider {vcs_provider_id}: {reason}")]
    InvalidCredentials {
        vcs_provider_id: Uuid,
        reason: String,
    },
    #[error("{context}: {source}")]
    Vcs {
        context: &'static str,
        #[source]
        source: VcsError,
    },
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
    /// The operation completed locally but left remote state behind.
    #[error(transparent)]
    Warning(#[from] DisconnectWarning),
}

/// Remote webhook cleanup failed after the hook was removed locally.
#[derive(Debug, Error)]
#[error("hook {hook_id} for {repo_identifier} was deleted, but its remote webhook was not: {source}")]
pub struct DisconnectWarning {
    pub hook_id: Uuid,
    pub repo_identifier: String,
    pub cloud_id: Option<String>,
    #[source]
    pub source: Box<HookError>,
}

impl HookError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// True when local state is consistent and only a notice should be shown.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Wraps a VCS client error with the step that produced it.
    pub fn vcs(context: &'static str) -> impl FnOnce(VcsError) -> Self {
        move |source| Self::Vcs { context, source }
    }

    /// Wraps a database error, letting unique violations surface as
    /// [`HookError::AlreadyExists`].
    pub fn database(context: &'static str) -> impl FnOnce(DbErr) -> Self {
        move |source| {
            if is_unique_violation(&source) {
                tracing::debug!(error = ?source, context, "unique constraint violation");
                Self::AlreadyExists(context.to_string())
            } else {
                tracing::error!(error = ?source, context, "database error");
                Self::Database { context, source }
            }
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                // Fallback: generate a correlation ID for basic client-server log correlation
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Postgres `23505`; SQLite `SQLITE_CONSTRAINT_UNIQUE` (2067) and
/// `SQLITE_CONSTRAINT_PRIMARYKEY` (1555).
pub(crate) fn is_unique_violation(error: &DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const UNIQUE_CODES: &[&str] = &["23505", "2067", "1555"];

    let (DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))) = error
    else {
        return false;
    };

    sqlx_err.as_database_error().is_some_and(|db_error| {
        db_error.is_unique_violation()
            || db_error
                .code()
                .is_some_and(|code| UNIQUE_CODES.contains(&&*code))
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<HookError> for ApiError {
    fn from(error: HookError) -> Self {
        match error {
            HookError::NotFound { resource } => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("{resource} not found"),
            ),
            HookError::AlreadyExists(what) => Self::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                &format!("Resource already exists: {what}"),
            ),
            HookError::InvalidArgument(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            HookError::InvalidCredentials {
                vcs_provider_id,
                reason,
            } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_CREDENTIALS",
                &format!("VCS provider {vcs_provider_id} credentials are invalid: {reason}"),
            ),
            HookError::Vcs { context, source } => vcs_error(context, &source),
            HookError::Database { source, .. } => source.into(),
            HookError::Warning(warning) => {
                tracing::warn!(error = %warning, "warning surfaced as error response");
                Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &warning.to_string())
            }
        }
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Query(query_err) => {
                tracing::error!("Database query error: {:?}", query_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Exec(exec_err) => {
                tracing::error!("Database execution error: {:?}", exec_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create a VCS upstream error (502) carrying the upstream status when known.
pub fn vcs_error(context: &str, error: &VcsError) -> ApiError {
    tracing::warn!(context, error = %error, "VCS provider request failed");
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        &format!("{context}: {error}"),
    )
    .with_details(json!({
        "context": context,
        "upstream_status": error.upstream_status(),
    }))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
    }

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn test_content_type_header() {
        let response =
            ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error").into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("test_record".to_string()).into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("test_record"));
    }

    #[test]
    fn test_hook_error_status_mapping() {
        let cases: Vec<(HookError, StatusCode, &str)> = vec![
            (
                HookError::not_found("hook 42"),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                HookError::AlreadyExists("repo connection".into()),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                HookError::InvalidArgument("unknown connection type".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
            ),
            (
                HookError::InvalidCredentials {
                    vcs_provider_id: Uuid::nil(),
                    reason: "bad token".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_CREDENTIALS",
            ),
            (
                HookError::Vcs {
                    context: "creating webhook",
                    source: VcsError::Api {
                        status: 422,
                        message: "hook exists".into(),
                    },
                },
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code.as_ref(), code);
        }
    }

    #[test]
    fn test_warning_is_distinguishable() {
        let warning = HookError::from(DisconnectWarning {
            hook_id: Uuid::nil(),
            repo_identifier: "acme/infra".into(),
            cloud_id: Some("gh-1".into()),
            source: Box::new(HookError::Vcs {
                context: "deleting webhook",
                source: VcsError::Api {
                    status: 500,
                    message: "boom".into(),
                },
            }),
        });

        assert!(warning.is_warning());
        assert!(!warning.is_not_found());
        assert!(warning.to_string().contains("acme/infra"));
        assert!(!HookError::not_found("hook").is_warning());
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({"resource_type": "must be workspace or module"});
        let error = validation_error("Validation failed", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }
}
