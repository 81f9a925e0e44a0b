//! Flat, model-facing view of every usable tool.
//!
//! Language models see a single namespace of functions, so each tool is
//! exposed as `<server>__<tool>`. Only tools of enabled, connected servers
//! are listed.

use serde::Serialize;
use toolbridge_core::{McpServer, McpTool};

/// Separator between server and tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// A tool together with the server that provides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedTool {
    /// `<server>__<tool>`.
    pub qualified_name: String,
    pub server_name: String,
    pub tool: McpTool,
}

pub fn qualified_name(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}{TOOL_NAME_SEPARATOR}{tool_name}")
}

/// Collect the tools of every enabled, connected server.
pub fn collect_tools<'a>(servers: impl IntoIterator<Item = &'a McpServer>) -> Vec<QualifiedTool> {
    servers
        .into_iter()
        .filter(|server| !server.disabled && server.is_connected())
        .flat_map(|server| {
            server.tools.iter().map(|tool| QualifiedTool {
                qualified_name: qualified_name(&server.name, &tool.name),
                server_name: server.name.clone(),
                tool: tool.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_core::McpServerStatus;

    fn server(name: &str, status: McpServerStatus, disabled: bool, tools: &[&str]) -> McpServer {
        McpServer {
            name: name.to_string(),
            config: "{}".to_string(),
            status,
            error: None,
            tools: tools.iter().map(|t| McpTool::new(*t)).collect(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            disabled,
            timeout: 60,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_only_connected_enabled_servers_listed() {
        let servers = [
            server("fs", McpServerStatus::Connected, false, &["read_file", "write_file"]),
            server("off", McpServerStatus::Disconnected, true, &["hidden"]),
            server("down", McpServerStatus::Disconnected, false, &["broken"]),
        ];

        let names: Vec<_> = collect_tools(&servers)
            .into_iter()
            .map(|t| t.qualified_name)
            .collect();

        assert_eq!(names, vec!["fs__read_file", "fs__write_file"]);
    }
}
