//! Command-line arguments of the `toolbridge-server` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use toolbridge_mcp::RetryPolicy;
use toolbridge_mcp::registry::DEFAULT_CAPACITY;

use crate::bootstrap::{CorsConfig, ServerConfig};

#[derive(Debug, Parser)]
#[command(
    name = "toolbridge-server",
    version,
    about = "HTTP host for per-user MCP tool server connections"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TOOLBRIDGE_PORT", default_value_t = 9888)]
    pub port: u16,

    /// Directory holding the per-user configuration documents
    #[arg(long, env = "TOOLBRIDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of users with live connections
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub registry_capacity: usize,

    /// Connect this user's servers at startup (repeatable)
    #[arg(long = "preload-user", value_name = "USER_ID")]
    pub preload_users: Vec<String>,

    /// Attempts for each preloaded user's initial connection
    #[arg(long, default_value_t = 3)]
    pub startup_attempts: u32,

    /// Allowed CORS origin (repeatable); all origins when omitted
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        let config = ServerConfig {
            port: self.port,
            data_dir: self.data_dir,
            registry_capacity: self.registry_capacity,
            preload_users: self.preload_users,
            startup_retry: RetryPolicy {
                max_attempts: self.startup_attempts,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
            },
            cors: CorsConfig::AllowAll,
        };

        if self.cors_origins.is_empty() {
            config
        } else {
            config.with_allowed_origins(self.cors_origins)
        }
    }
}
