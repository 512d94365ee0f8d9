use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing trigger secret")]
    Unauthorized,

    #[error("a sync run is already in progress")]
    RunInProgress,

    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_trigger_secret",
                "invalid or missing trigger secret".to_string(),
            ),
            AppError::RunInProgress => (
                StatusCode::CONFLICT,
                "conflict_error",
                "run_in_progress",
                "a sync run is already in progress".to_string(),
            ),
            AppError::NotConfigured(what) => {
                tracing::error!("endpoint called but {} is not configured", what);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "configuration_error",
                    "not_configured",
                    format!("{} is not configured", what),
                )
            }
            AppError::Persistence(e) => {
                tracing::error!("Persistence error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

/// A write or read against the durable stores failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Failure of a single call against the upstream listing API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Transport failures and statuses outside 2xx/4xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(_) => true,
            UpstreamError::Status { status, .. } => {
                !(200..300).contains(status) && !(400..500).contains(status)
            }
            UpstreamError::Decode(_) => false,
        }
    }
}
