//! MCP (Model Context Protocol) capability server domain types.
//!
//! These types represent capability servers independent of any
//! infrastructure concerns (storage, process management, HTTP).
//!
//! # Design
//!
//! - `McpServerConfig` - Validated desired state (transport sum type + shared fields)
//! - `RawServerConfig` / `McpServersDocument` - Persisted document format
//! - `McpServer` - Snapshot of one connection record
//! - `McpServerStatus` - Connection status (connecting, connected, disconnected)
//! - `McpTool`, `McpResource`, `McpResourceTemplate` - Discovered capabilities
//! - `McpToolCallResult` - Result of a tool invocation

mod config;
mod types;

pub use config::{
    ConfigValidationError, DEFAULT_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS, McpServerConfig,
    McpServersDocument, McpTransportConfig, McpTransportType, RawServerConfig, ValidatedServers,
    parse_server_url,
};
pub use types::{
    McpContent, McpEmbeddedResource, McpResource, McpResourceTemplate, McpServer,
    McpServerStatus, McpTool, McpToolCallResult,
};
