//! Configuration store adapters for toolbridge.
//!
//! Implements the [`McpConfigStore`](toolbridge_core::McpConfigStore) port:
//!
//! - [`JsonFileConfigStore`] keeps one `{ "mcpServers": { ... } }` document per
//!   user on disk
//! - [`InMemoryConfigStore`] keeps documents in memory, for tests and
//!   ephemeral deployments
#![deny(unused_crate_dependencies)]

mod file_store;
mod memory_store;
pub mod paths;

pub use file_store::JsonFileConfigStore;
pub use memory_store::InMemoryConfigStore;

// Silence unused dev-dependency warnings (used only in tests)
#[cfg(test)]
use tempfile as _;
