//! MCP service error types.
//!
//! This module defines the errors returned by the connection manager's public
//! operations.

use thiserror::Error;

use super::McpConfigStoreError;
use crate::domain::mcp::ConfigValidationError;

/// Errors returned by connection manager operations.
///
/// Messages are meant to be shown to the caller unchanged; `Invocation` in
/// particular carries the underlying failure text verbatim so a model can
/// reason about retrying with another tool or server.
#[derive(Debug, Clone, Error)]
pub enum McpServiceError {
    /// Bad name, URL, timeout or unknown server. Raised before any mutation.
    #[error("{0}")]
    Validation(String),

    /// Connecting to a newly added server failed.
    #[error("{0}")]
    Transport(String),

    /// Configuration store read or write failed.
    #[error(transparent)]
    Configuration(#[from] McpConfigStoreError),

    /// Tool invocation failed (including missing or disabled server).
    #[error("{0}")]
    Invocation(String),

    /// The manager has shut down and no longer accepts operations.
    #[error("MCP manager unavailable: {0}")]
    Unavailable(String),
}

impl From<ConfigValidationError> for McpServiceError {
    fn from(err: ConfigValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Categories of MCP errors for adapter-level handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpErrorCategory {
    /// Caller input was rejected.
    Validation,
    /// Transport connect failure.
    Transport,
    /// Persistence failure.
    Configuration,
    /// Tool invocation failure.
    Invocation,
    /// Unknown/internal error.
    Unknown,
}

impl From<&McpServiceError> for McpErrorCategory {
    fn from(error: &McpServiceError) -> Self {
        match error {
            McpServiceError::Validation(_) => Self::Validation,
            McpServiceError::Transport(_) => Self::Transport,
            McpServiceError::Configuration(_) => Self::Configuration,
            McpServiceError::Invocation(_) => Self::Invocation,
            McpServiceError::Unavailable(_) => Self::Unknown,
        }
    }
}
