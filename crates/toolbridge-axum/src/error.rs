//! Axum-specific error types and mappings.
//!
//! Manager validation failures become 400, everything else the manager
//! reports becomes 500. Bodies are always `{"error": ..., "status": ...}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use toolbridge_core::{McpErrorCategory, McpServiceError};

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Missing or malformed request input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No user identity on the request.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl HttpError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(self) -> String {
        match self {
            Self::BadRequest(msg) | Self::Unauthorized(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: self.message(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<McpServiceError> for HttpError {
    fn from(err: McpServiceError) -> Self {
        let category = McpErrorCategory::from(&err);
        tracing::debug!(?category, error = %err, "MCP operation failed");

        match err {
            McpServiceError::Validation(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
