//! Core domain types and port definitions for toolbridge.
//!
//! This crate has no I/O: it defines what a capability server configuration
//! looks like, what the manager reports about live connections, and the
//! traits infrastructure adapters implement.
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::mcp::{
    ConfigValidationError, DEFAULT_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS, McpContent,
    McpEmbeddedResource, McpResource, McpResourceTemplate, McpServer, McpServerConfig,
    McpServerStatus, McpServersDocument, McpTool, McpToolCallResult, McpTransportConfig,
    McpTransportType, RawServerConfig, ValidatedServers, parse_server_url,
};
pub use ports::{McpConfigStore, McpConfigStoreError, McpErrorCategory, McpServiceError};
