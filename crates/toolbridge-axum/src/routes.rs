//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::{AxumContext, CorsConfig};
use crate::handlers;
use crate::state::AppState;

/// Build CORS layer from configuration.
fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// MCP routes without the `/api/mcp` prefix.
pub(crate) fn mcp_routes() -> Router<AppState> {
    Router::new()
        .route("/servers", get(handlers::mcp::list))
        .route("/servers/add", post(handlers::mcp::add))
        .route("/servers/add-stdio", post(handlers::mcp::add_stdio))
        .route("/servers/toggle", post(handlers::mcp::toggle))
        .route("/servers/restart", post(handlers::mcp::restart))
        .route("/servers/delete", post(handlers::mcp::delete))
        .route("/tools", get(handlers::mcp::list_tools))
        .route("/tools/call", post(handlers::mcp::call_tool))
}

/// Create the main Axum router with all API routes.
pub fn create_router(ctx: AxumContext, cors_config: &CorsConfig) -> Router {
    let state: AppState = Arc::new(ctx);
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/mcp", mcp_routes().with_state(state).layer(cors))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
pub(crate) async fn health_check() -> &'static str {
    "OK"
}
