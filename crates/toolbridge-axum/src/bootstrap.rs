//! Axum server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the Axum web adapter. All concrete implementations are instantiated here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use toolbridge_core::McpConfigStore;
use toolbridge_mcp::{
    DefaultConnector, McpRegistry, RetryPolicy, TransportConnector, initialize_with_retry,
    registry::DEFAULT_CAPACITY,
};
use toolbridge_store::JsonFileConfigStore;
use toolbridge_store::paths::mcp_config_dir;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration for the Axum adapter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// Root for per-user configuration documents. Defaults to the platform
    /// data directory.
    pub data_dir: Option<PathBuf>,
    /// Maximum number of users with live managers.
    pub registry_capacity: usize,
    /// Users whose servers are connected at startup.
    pub preload_users: Vec<String>,
    /// Retry policy for the startup connections of preloaded users.
    pub startup_retry: RetryPolicy,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9888,
            data_dir: None,
            registry_capacity: DEFAULT_CAPACITY,
            preload_users: Vec::new(),
            startup_retry: RetryPolicy::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set CORS to allow specific origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// Application context for the Axum adapter.
pub struct AxumContext {
    /// Per-user connection managers.
    pub registry: Arc<McpRegistry>,
}

/// Wire the file store and the real transports.
pub fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    let store_root = match &config.data_dir {
        Some(dir) => dir.join("mcp"),
        None => mcp_config_dir()?,
    };

    tracing::info!(
        target: "toolbridge.paths",
        config_dir = %store_root.display(),
        registry_capacity = config.registry_capacity,
        "Axum bootstrap resolved paths"
    );

    let store: Arc<dyn McpConfigStore> = Arc::new(JsonFileConfigStore::new(store_root));
    let connector: Arc<dyn TransportConnector> = Arc::new(DefaultConnector::new());

    Ok(bootstrap_with(store, connector, config.registry_capacity))
}

/// Wire explicit adapters. Used by tests and embedders.
pub fn bootstrap_with(
    store: Arc<dyn McpConfigStore>,
    connector: Arc<dyn TransportConnector>,
    registry_capacity: usize,
) -> AxumContext {
    AxumContext {
        registry: Arc::new(McpRegistry::new(store, connector, registry_capacity)),
    }
}

/// Start the web server and run until Ctrl-C or SIGTERM.
///
/// Every live transport is closed before this returns, so no capability
/// server subprocess outlives the host.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;

    let ctx = bootstrap(&config)?;
    let registry = Arc::clone(&ctx.registry);

    preload_users(&registry, &config.preload_users, config.startup_retry);

    let app = crate::routes::create_router(ctx, &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("toolbridge server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, disconnecting MCP servers");
    registry.disconnect_all().await;
    Ok(())
}

fn preload_users(registry: &Arc<McpRegistry>, users: &[String], policy: RetryPolicy) {
    for user_id in users {
        let manager = registry.get_or_create(user_id).manager;
        tokio::spawn(async move {
            match initialize_with_retry(&manager, policy).await {
                Ok(()) => tracing::info!(user_id = %manager.user_id(), "MCP client initialized"),
                Err(e) => {
                    tracing::error!(user_id = %manager.user_id(), error = %e, "Failed to initialize MCP client");
                }
            }
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
