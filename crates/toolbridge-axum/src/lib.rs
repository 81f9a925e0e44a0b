//! HTTP surface for toolbridge.
//!
//! A thin Axum adapter over [`toolbridge_mcp::McpRegistry`]: every route
//! under `/api/mcp` resolves the caller's manager from the `x-user-id` header
//! and forwards to it. [`bootstrap`] is the composition root.
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Silence unused dev-dependency warnings (used by integration tests)
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tower as _;

use tracing_subscriber as _; // Used by main.rs binary

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export primary types
pub use bootstrap::{AxumContext, CorsConfig, ServerConfig, bootstrap, bootstrap_with, start_server};
pub use cli::Cli;
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
