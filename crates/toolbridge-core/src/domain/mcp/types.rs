//! MCP server domain types.
//!
//! These types cross the HTTP boundary, so their JSON shape is part of the
//! contract with the frontend (camelCase field names).

use serde::{Deserialize, Serialize};

/// Connection status of a capability server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerStatus {
    /// Transport is being established or restarted
    Connecting,
    /// Handshake completed, capabilities fetched
    Connected,
    /// No live transport (disabled, failed, or closed by the peer)
    #[default]
    Disconnected,
}

/// Point-in-time view of one connection record.
///
/// Returned by the manager's `get_servers`; disabled servers are included so
/// the UI can show them instead of hiding them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    /// Unique name within the user's configuration.
    pub name: String,

    /// Serialized desired configuration (persisted JSON shape).
    pub config: String,

    pub status: McpServerStatus,

    /// Last connection error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub tools: Vec<McpTool>,

    #[serde(default)]
    pub resources: Vec<McpResource>,

    #[serde(default)]
    pub resource_templates: Vec<McpResourceTemplate>,

    pub disabled: bool,

    /// Effective per-call timeout in seconds.
    pub timeout: u64,

    /// Recent stderr lines classified as errors (stdio servers only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl McpServer {
    pub fn is_connected(&self) -> bool {
        self.status == McpServerStatus::Connected
    }
}

/// Tool advertised by a capability server.
///
/// Deserializes directly from a `tools/list` entry; `autoApprove` is not part
/// of the protocol and is filled in from the server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    #[serde(default)]
    pub auto_approve: bool,
}

impl McpTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            auto_approve: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Concrete resource exposed by a server (read-only descriptor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameterized resource exposed by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResourceTemplate {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource embedded in a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpEmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// One content item of a tool result.
///
/// Unknown `type` values fail deserialization, so a malformed tool response
/// surfaces as an error instead of being passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: McpEmbeddedResource,
    },
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolCallResult {
    pub content: Vec<McpContent>,

    /// Set by the server when the tool itself failed.
    #[serde(default)]
    pub is_error: bool,

    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl McpToolCallResult {
    /// Single text item result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
            meta: None,
        }
    }

    /// Concatenated text of all text items.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                McpContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
