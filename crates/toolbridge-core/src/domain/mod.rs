//! Core domain types.
//!
//! These types represent the pure domain model, independent of any
//! infrastructure concerns (storage, processes, HTTP).

pub mod mcp;

// Re-export MCP types at the domain level for convenience
pub use mcp::{
    ConfigValidationError, McpContent, McpResource, McpResourceTemplate, McpServer,
    McpServerConfig, McpServerStatus, McpServersDocument, McpTool, McpToolCallResult,
    McpTransportConfig, McpTransportType,
};
