//! Data directory resolution.

use std::env;
use std::path::PathBuf;

use toolbridge_core::McpConfigStoreError;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TOOLBRIDGE_DATA_DIR";

/// Resolve the root directory for persisted state.
///
/// Resolution order:
/// 1. `TOOLBRIDGE_DATA_DIR` environment variable
/// 2. `<system local data dir>/toolbridge`
pub fn data_root() -> Result<PathBuf, McpConfigStoreError> {
    if let Ok(path) = env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let data_dir = dirs::data_local_dir().ok_or_else(|| {
        McpConfigStoreError::Io("could not determine the local data directory".to_string())
    })?;

    Ok(data_dir.join("toolbridge"))
}

/// Directory holding one MCP configuration document per user.
pub fn mcp_config_dir() -> Result<PathBuf, McpConfigStoreError> {
    Ok(data_root()?.join("mcp"))
}
