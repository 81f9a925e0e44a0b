//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core domain expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No filesystem or network types in any signature
//! - Store traits are minimal: read the whole document, write the whole document

pub mod mcp_config_store;
pub mod mcp_error;

pub use mcp_config_store::{McpConfigStore, McpConfigStoreError};
pub use mcp_error::{McpErrorCategory, McpServiceError};
