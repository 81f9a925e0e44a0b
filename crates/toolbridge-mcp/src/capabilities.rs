//! Capability discovery after the handshake.

use std::time::Duration;

use serde::Deserialize;
use toolbridge_core::{McpResource, McpResourceTemplate, McpServerConfig, McpTool};

use crate::session::Session;

/// Timeout for each list request.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a server advertised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub resource_templates: Vec<McpResourceTemplate>,
}

#[derive(Deserialize)]
struct ToolsList {
    #[serde(default)]
    tools: Vec<McpTool>,
}

#[derive(Deserialize)]
struct ResourcesList {
    #[serde(default)]
    resources: Vec<McpResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceTemplatesList {
    #[serde(default)]
    resource_templates: Vec<McpResourceTemplate>,
}

/// Fetch tools, resources and resource templates.
///
/// Each list is independent: a server that does not implement resources
/// still gets its tools listed. Failures degrade to an empty list.
pub async fn fetch_capabilities(session: &Session, config: &McpServerConfig) -> Capabilities {
    let (tools, resources, templates) = tokio::join!(
        session.request::<ToolsList>("tools/list", None, LIST_TIMEOUT),
        session.request::<ResourcesList>("resources/list", None, LIST_TIMEOUT),
        session.request::<ResourceTemplatesList>("resources/templates/list", None, LIST_TIMEOUT),
    );

    let tools = match tools {
        Ok(list) => list
            .tools
            .into_iter()
            .map(|mut tool| {
                tool.auto_approve = config.is_auto_approved(&tool.name);
                tool
            })
            .collect(),
        Err(e) => {
            tracing::warn!(server_name = %session.server(), error = %e, "Failed to fetch tools");
            Vec::new()
        }
    };

    let resources = resources.map(|list| list.resources).unwrap_or_else(|e| {
        tracing::debug!(server_name = %session.server(), error = %e, "Failed to fetch resources");
        Vec::new()
    });

    let resource_templates = templates
        .map(|list| list.resource_templates)
        .unwrap_or_else(|e| {
            tracing::debug!(server_name = %session.server(), error = %e, "Failed to fetch resource templates");
            Vec::new()
        });

    tracing::info!(
        server_name = %session.server(),
        tool_count = tools.len(),
        resource_count = resources.len(),
        "MCP capabilities fetched"
    );

    Capabilities {
        tools,
        resources,
        resource_templates,
    }
}
