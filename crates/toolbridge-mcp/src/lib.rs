//! Connection and capability management for MCP tool servers.
//!
//! Each user owns an [`McpManager`] that keeps live connections to the
//! enabled servers of their stored configuration, exposes what those servers
//! advertise, and invokes tools with per-server timeouts. Managers are handed
//! out by an [`McpRegistry`].
//!
//! | Module | Role |
//! |--------|------|
//! | [`transport`] | stdio and event-stream transports, JSON-RPC plumbing |
//! | [`session`] | protocol handshake and typed requests over a transport |
//! | [`capabilities`] | tool and resource discovery after connect |
//! | [`reconciler`] | desired vs. live diffing |
//! | [`manager`] | the per-user actor |
//! | [`registry`] | user id to manager, bounded |

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

pub mod capabilities;
pub mod catalog;
pub mod manager;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod startup;
pub mod stderr;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export domain types from core for convenience
pub use toolbridge_core::{
    McpServer, McpServerConfig, McpServerStatus, McpServiceError, McpTool, McpToolCallResult,
};

pub use catalog::QualifiedTool;
pub use manager::McpManager;
pub use registry::{Lookup, McpRegistry};
pub use startup::{RetryPolicy, initialize_with_retry};
pub use stderr::{KeywordClassifier, StderrClassifier, StderrLevel};
pub use transport::{DefaultConnector, Transport, TransportConnector, TransportError};
