//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use registry_core::Error as CoreError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("registry error: {0}")]
    Registry(#[from] CoreError),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

/// Error response body, shaped like the widely deployed reference Schema
/// Registry's `{error_code, message}`.
#[derive(Serialize)]
struct ErrorResponse {
    error_code: i32,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 50001, "backend datastore error".to_string())
            }
            AppError::Registry(e) => registry_error_response(e),
            AppError::BadRequest(msg) => (StatusCode::UNPROCESSABLE_ENTITY, 42201, msg.clone()),
        };

        let body = Json(ErrorResponse {
            error_code,
            message,
        });

        (status, body).into_response()
    }
}

/// Maps each core error kind to the status/code pair a transport layer is
/// expected to surface.
fn registry_error_response(err: &CoreError) -> (StatusCode, i32, String) {
    match err {
        CoreError::InvalidSchema(_) => (StatusCode::UNPROCESSABLE_ENTITY, 42201, err.to_string()),
        CoreError::IncompatibleSchema { .. } => {
            (StatusCode::CONFLICT, 409, err.to_string())
        }
        CoreError::SubjectNotFound(_) => (StatusCode::NOT_FOUND, 40401, err.to_string()),
        CoreError::VersionNotFound { .. } => (StatusCode::NOT_FOUND, 40402, err.to_string()),
        CoreError::SchemaNotFound(_) => (StatusCode::NOT_FOUND, 40403, err.to_string()),
        CoreError::SchemaExists => {
            tracing::error!("SchemaExists leaked past the engine's dedupe reconciliation");
            (StatusCode::INTERNAL_SERVER_ERROR, 50002, "internal dedupe error".to_string())
        }
        CoreError::SchemaIdConflict { .. } => (StatusCode::CONFLICT, 42264, err.to_string()),
        CoreError::ReferencedByOther(_) => (StatusCode::CONFLICT, 42206, err.to_string()),
        CoreError::ModeForbidden => (StatusCode::FORBIDDEN, 42205, err.to_string()),
        CoreError::InvalidCompatibilityLevel(_) => (StatusCode::UNPROCESSABLE_ENTITY, 42203, err.to_string()),
        CoreError::InvalidMode(_) => (StatusCode::UNPROCESSABLE_ENTITY, 42204, err.to_string()),
        CoreError::StorageUnavailable(_) => {
            tracing::error!("storage unavailable: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, 50003, "backend datastore error".to_string())
        }
        CoreError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, 50301, err.to_string()),
        CoreError::UnresolvedReference { .. } => (StatusCode::UNPROCESSABLE_ENTITY, 42202, err.to_string()),
        CoreError::GlobalContextForbidden => (StatusCode::FORBIDDEN, 42207, err.to_string()),
        CoreError::InvalidImportRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, 42208, err.to_string()),
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
