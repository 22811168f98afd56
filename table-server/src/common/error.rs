//! Unified Error Handling
//!
//! Application-wide error taxonomy and response structure.
//!
//! | Code  | Variant     | Status |
//! |-------|-------------|--------|
//! | E0002 | Validation  | 400    |
//! | E0003 | NotFound    | 404    |
//! | E0004 | Conflict    | 409    |
//! | E0005 | State       | 422    |
//! | E0007 | RateLimited | 429    |
//! | E9002 | Infra       | 503    |
//! | E9001 | Internal    | 500    |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Unified API response structure
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> AppResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            code: "E0000".to_string(),
            message: "Success".to_string(),
            data: Some(data),
        })
    }
}

/// Application-level error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Business Logic Errors ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal state: {0}")]
    State(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    // ========== System Errors ==========
    /// Backing cache/queue/database unavailable. Terminal for ledger
    /// writes, fail-open for guard checks.
    #[error("Infrastructure error: {0}")]
    Infra(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        AppError::State(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        AppError::RateLimited(msg.into())
    }

    pub fn infra(msg: impl Into<String>) -> Self {
        AppError::Infra(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "E0002", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "E0003", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "E0004", msg.clone()),
            AppError::State(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "E0005", msg.clone()),
            AppError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, "E0007", msg.clone()),
            AppError::Infra(msg) => {
                error!(target: "infra", error = %msg, "Infrastructure error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "E9002",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9001",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(AppResponse::<()> {
            code: code.to_string(),
            message,
            data: None,
        });

        (status, body).into_response()
    }
}
