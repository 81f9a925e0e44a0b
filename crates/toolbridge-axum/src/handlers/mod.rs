//! HTTP request handlers for the Axum web server.
//!
//! Handlers are thin wrappers that resolve the caller's manager from the
//! registry and delegate to it.

pub mod mcp;
