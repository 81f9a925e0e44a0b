//! MCP configuration store trait and error types.
//!
//! This module defines the persistence abstraction for each user's desired
//! set of capability servers.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::mcp::McpServersDocument;

/// Domain-specific errors for configuration store operations.
///
/// This error type abstracts away storage implementation details and provides
/// a clean interface for the manager to handle persistence failures.
#[derive(Debug, Clone, Error)]
pub enum McpConfigStoreError {
    /// The user identifier cannot be mapped to a storage location.
    #[error("Invalid user id: {0}")]
    InvalidUser(String),

    /// Storage backend error (filesystem, remote store, etc.).
    #[error("Failed to access MCP configuration: {0}")]
    Io(String),

    /// Stored document could not be encoded or decoded.
    #[error("Malformed MCP configuration document: {0}")]
    Serialization(String),
}

/// Store for the per-user `{ "mcpServers": { ... } }` document.
///
/// # Design Rules
///
/// - One document per user; `write` replaces it entirely
/// - `read` on an unknown user creates and returns an empty document
/// - Implementations must not cache across calls: the manager re-reads the
///   document on every reconciliation trigger
///
/// # Example
///
/// ```ignore
/// let mut document = store.read("user-1").await?;
/// document.insert("search", McpServerConfig::sse("https://example.com/sse")?);
/// store.write("user-1", &document).await?;
/// ```
#[async_trait]
pub trait McpConfigStore: Send + Sync {
    /// Read the user's document, creating an empty one on first access.
    ///
    /// # Errors
    ///
    /// - `InvalidUser` if the id cannot be stored
    /// - `Io` / `Serialization` for storage errors
    async fn read(&self, user_id: &str) -> Result<McpServersDocument, McpConfigStoreError>;

    /// Replace the user's document.
    ///
    /// # Errors
    ///
    /// - `InvalidUser` if the id cannot be stored
    /// - `Io` / `Serialization` for storage errors
    async fn write(
        &self,
        user_id: &str,
        document: &McpServersDocument,
    ) -> Result<(), McpConfigStoreError>;
}
