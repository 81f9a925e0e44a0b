//! MCP handlers - capability server management and tool invocation.
//!
//! Every route is scoped to the user named by the `x-user-id` header.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolbridge_mcp::{McpManager, McpServer, McpToolCallResult, QualifiedTool};

use crate::error::HttpError;
use crate::state::AppState;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .ok_or_else(|| HttpError::Unauthorized("User ID required".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ServersResponse {
    pub servers: Vec<McpServer>,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<QualifiedTool>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    const fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Debug, Serialize)]
pub struct ToolCallResponse {
    pub result: McpToolCallResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddServerRequest {
    pub server_name: Option<String>,
    pub server_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleServerRequest {
    pub server_name: Option<String>,
    pub disabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNameRequest {
    pub server_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequest {
    pub server_name: Option<String>,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_arguments: Value,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Manager for `user_id`, loading its configuration if it was just created.
///
/// A failed load is not fatal: the snapshot still lists every server with
/// its connection error.
async fn initialized_manager(state: &AppState, user_id: &str) -> Arc<McpManager> {
    let lookup = state.registry.get_or_create(user_id);
    if lookup.created {
        if let Err(e) = lookup.manager.initialize().await {
            tracing::warn!(user_id, error = %e, "MCP initialization incomplete");
        }
    }
    lookup.manager
}

fn manager(state: &AppState, user_id: &str) -> Arc<McpManager> {
    state.registry.get_or_create(user_id).manager
}

/// List all servers of the caller.
pub async fn list(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Json<ServersResponse> {
    let manager = initialized_manager(&state, &user_id).await;
    Json(ServersResponse {
        servers: manager.get_servers(),
    })
}

/// List every usable tool under its qualified name.
pub async fn list_tools(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Json<ToolsResponse> {
    let manager = initialized_manager(&state, &user_id).await;
    Json(ToolsResponse {
        tools: manager.active_tools(),
    })
}

/// Add a remote event-stream server.
pub async fn add(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<AddServerRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, HttpError> {
    let Json(req) = payload?;
    let (Some(name), Some(url)) = (present(req.server_name), present(req.server_url)) else {
        return Err(HttpError::BadRequest(
            "Server name and URL are required".to_string(),
        ));
    };

    manager(&state, &user_id)
        .add_remote_server(name, url)
        .await?;
    Ok(SuccessResponse::ok())
}

/// Pick up stdio servers written to the configuration out of band.
pub async fn add_stdio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<SuccessResponse>, HttpError> {
    manager(&state, &user_id).add_stdio_server().await?;
    Ok(SuccessResponse::ok())
}

/// Enable or disable a server.
pub async fn toggle(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<ToggleServerRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, HttpError> {
    let Json(req) = payload?;
    let (Some(name), Some(disabled)) = (present(req.server_name), req.disabled) else {
        return Err(HttpError::BadRequest(
            "Server name and disabled state are required".to_string(),
        ));
    };

    manager(&state, &user_id)
        .toggle_server_disabled(name, disabled)
        .await?;
    Ok(SuccessResponse::ok())
}

/// Rebuild one server's connection.
pub async fn restart(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<ServerNameRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, HttpError> {
    let name = server_name(payload)?;
    manager(&state, &user_id).restart_connection(name).await?;
    Ok(SuccessResponse::ok())
}

/// Remove a server from the configuration.
pub async fn delete(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<ServerNameRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, HttpError> {
    let name = server_name(payload)?;
    manager(&state, &user_id).delete_server(name).await?;
    Ok(SuccessResponse::ok())
}

/// Call a tool on one of the caller's servers.
pub async fn call_tool(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<CallToolRequest>, JsonRejection>,
) -> Result<Json<ToolCallResponse>, HttpError> {
    let Json(req) = payload?;
    let (Some(server), Some(tool)) = (present(req.server_name), present(req.tool_name)) else {
        return Err(HttpError::BadRequest(
            "Server name and tool name are required".to_string(),
        ));
    };

    let result = manager(&state, &user_id)
        .call_tool(&server, &tool, req.tool_arguments)
        .await?;
    Ok(Json(ToolCallResponse { result }))
}

fn server_name(payload: Result<Json<ServerNameRequest>, JsonRejection>) -> Result<String, HttpError> {
    let Json(req) = payload?;
    present(req.server_name)
        .ok_or_else(|| HttpError::BadRequest("Server name is required".to_string()))
}
