//! Desired-state configuration for capability servers.
//!
//! Two layers live here:
//!
//! - [`RawServerConfig`] mirrors the persisted JSON entry exactly and accepts
//!   anything the document format allows (missing `transportType`, fractional
//!   timeouts, ...).
//! - [`McpServerConfig`] is the validated form. Converting a raw entry is the
//!   only way to obtain one, so every consumer downstream of the store boundary
//!   can rely on the invariants (non-empty command, parseable URL, timeout at or
//!   above [`MIN_TIMEOUT_SECONDS`]).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Per-call timeout applied when a server entry does not configure one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Smallest per-call timeout a server entry may configure.
pub const MIN_TIMEOUT_SECONDS: u64 = 1;

/// Transport discriminant as written in the persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportType {
    /// Local subprocess speaking JSON-RPC over stdin/stdout.
    Stdio,
    /// Remote HTTP endpoint speaking the event-stream protocol.
    Sse,
}

impl std::fmt::Display for McpTransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Sse => f.write_str("sse"),
        }
    }
}

/// Errors raised while validating a server configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("Server configuration requires either a command (stdio) or a url (sse)")]
    MissingTransport,

    #[error("{transport} server configuration requires '{field}'")]
    MissingField {
        transport: McpTransportType,
        field: &'static str,
    },

    #[error("Stdio server command cannot be empty")]
    EmptyCommand,

    #[error("Invalid server URL: {url}. Please provide a valid URL.")]
    InvalidUrl { url: String, reason: String },

    #[error("Timeout must be at least {MIN_TIMEOUT_SECONDS} second(s), got {0}")]
    TimeoutBelowMinimum(String),

    #[error("Malformed server configuration: {0}")]
    Malformed(String),
}

/// How to reach a capability server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransportConfig {
    /// Spawn `command args` with `env` overrides.
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Open an event stream at `url`.
    Sse { url: Url },
}

impl McpTransportConfig {
    pub const fn transport_type(&self) -> McpTransportType {
        match self {
            Self::Stdio { .. } => McpTransportType::Stdio,
            Self::Sse { .. } => McpTransportType::Sse,
        }
    }
}

/// Validated configuration for one capability server.
///
/// Equality is structural, which is what reconciliation uses to decide
/// whether a live connection must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub struct McpServerConfig {
    pub transport: McpTransportConfig,
    pub disabled: bool,
    pub timeout: Duration,
    pub auto_approve: Vec<String>,
}

impl McpServerConfig {
    /// Create an enabled stdio configuration with default timeout.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(McpTransportConfig::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        })
    }

    /// Create an enabled event-stream configuration, validating the URL.
    pub fn sse(url: &str) -> Result<Self, ConfigValidationError> {
        Ok(Self::with_transport(McpTransportConfig::Sse {
            url: parse_server_url(url)?,
        }))
    }

    const fn with_transport(transport: McpTransportConfig) -> Self {
        Self {
            transport,
            disabled: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            auto_approve: Vec::new(),
        }
    }

    /// Add an environment override (stdio only, ignored for sse).
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let McpTransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    #[must_use]
    pub const fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the per-call timeout, enforcing the minimum floor.
    pub fn with_timeout_secs(mut self, seconds: u64) -> Result<Self, ConfigValidationError> {
        if seconds < MIN_TIMEOUT_SECONDS {
            return Err(ConfigValidationError::TimeoutBelowMinimum(
                seconds.to_string(),
            ));
        }
        self.timeout = Duration::from_secs(seconds);
        Ok(self)
    }

    #[must_use]
    pub fn with_auto_approve(mut self, tools: Vec<String>) -> Self {
        self.auto_approve = tools;
        self
    }

    pub const fn transport_type(&self) -> McpTransportType {
        self.transport.transport_type()
    }

    /// Whether a tool of this server may run without user confirmation.
    pub fn is_auto_approved(&self, tool_name: &str) -> bool {
        self.auto_approve.iter().any(|name| name == tool_name)
    }

    /// Parse and validate a single entry from its JSON value.
    pub fn from_value(value: Value) -> Result<Self, ConfigValidationError> {
        let raw: RawServerConfig = serde_json::from_value(value)
            .map_err(|e| ConfigValidationError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Parse and validate a serialized entry.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigValidationError> {
        let raw: RawServerConfig = serde_json::from_str(json)
            .map_err(|e| ConfigValidationError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Serialize to the persisted JSON shape.
    pub fn to_json_string(&self) -> String {
        let raw = RawServerConfig::from(self.clone());
        // Every field of the raw form is a plain string, bool, number or list.
        serde_json::to_string(&raw).unwrap_or_default()
    }
}

/// Validate a remote server URL.
///
/// Only `http` and `https` are accepted since the event-stream transport is
/// the only consumer.
pub fn parse_server_url(url: &str) -> Result<Url, ConfigValidationError> {
    let invalid = |reason: String| ConfigValidationError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

/// One entry of the persisted document, exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<McpTransportType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    /// Seconds; JSON number, possibly fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<serde_json::Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve: Option<Vec<String>>,
}

impl RawServerConfig {
    /// Explicit transport type, or the one implied by the populated fields.
    fn resolved_transport_type(&self) -> Option<McpTransportType> {
        self.transport_type.or_else(|| {
            if self.command.is_some() {
                Some(McpTransportType::Stdio)
            } else if self.url.is_some() {
                Some(McpTransportType::Sse)
            } else {
                None
            }
        })
    }
}

fn parse_timeout(number: Option<&serde_json::Number>) -> Result<Duration, ConfigValidationError> {
    let Some(number) = number else {
        return Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
    };
    let below = || ConfigValidationError::TimeoutBelowMinimum(number.to_string());

    let seconds = number.as_f64().ok_or_else(below)?;
    #[allow(clippy::cast_precision_loss)]
    let floor = MIN_TIMEOUT_SECONDS as f64;
    if !seconds.is_finite() || seconds < floor {
        return Err(below());
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| ConfigValidationError::Malformed(e.to_string()))
}

impl TryFrom<RawServerConfig> for McpServerConfig {
    type Error = ConfigValidationError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let transport = match raw
            .resolved_transport_type()
            .ok_or(ConfigValidationError::MissingTransport)?
        {
            McpTransportType::Stdio => {
                let command = raw.command.ok_or(ConfigValidationError::MissingField {
                    transport: McpTransportType::Stdio,
                    field: "command",
                })?;
                if command.trim().is_empty() {
                    return Err(ConfigValidationError::EmptyCommand);
                }
                McpTransportConfig::Stdio {
                    command,
                    args: raw.args.unwrap_or_default(),
                    env: raw.env.unwrap_or_default(),
                }
            }
            McpTransportType::Sse => {
                let url = raw.url.as_deref().ok_or(ConfigValidationError::MissingField {
                    transport: McpTransportType::Sse,
                    field: "url",
                })?;
                McpTransportConfig::Sse {
                    url: parse_server_url(url)?,
                }
            }
        };

        Ok(Self {
            transport,
            disabled: raw.disabled.unwrap_or(false),
            timeout: parse_timeout(raw.timeout.as_ref())?,
            auto_approve: raw.auto_approve.unwrap_or_default(),
        })
    }
}

impl From<McpServerConfig> for RawServerConfig {
    fn from(config: McpServerConfig) -> Self {
        let timeout = if config.timeout.subsec_nanos() == 0 {
            Some(serde_json::Number::from(config.timeout.as_secs()))
        } else {
            serde_json::Number::from_f64(config.timeout.as_secs_f64())
        };

        let mut raw = Self {
            transport_type: Some(config.transport.transport_type()),
            disabled: Some(config.disabled),
            timeout,
            auto_approve: Some(config.auto_approve),
            ..Self::default()
        };

        match config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                raw.command = Some(command);
                raw.args = Some(args);
                raw.env = (!env.is_empty()).then_some(env);
            }
            McpTransportConfig::Sse { url } => {
                raw.url = Some(url.to_string());
            }
        }
        raw
    }
}

/// The per-user document held by the configuration store.
///
/// Entries are kept as raw JSON so that a single malformed entry never makes
/// the whole document unreadable, and so that unknown fields written by other
/// tools survive a read-modify-write cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServersDocument {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, Value>,
}

/// Result of validating every entry of a document.
#[derive(Debug, Default)]
pub struct ValidatedServers {
    pub valid: BTreeMap<String, McpServerConfig>,
    pub invalid: Vec<(String, ConfigValidationError)>,
}

impl McpServersDocument {
    pub fn contains(&self, name: &str) -> bool {
        self.mcp_servers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.mcp_servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty()
    }

    /// Insert or replace an entry with a validated configuration.
    pub fn insert(&mut self, name: impl Into<String>, config: McpServerConfig) {
        let raw = RawServerConfig::from(config);
        let value = serde_json::to_value(raw).unwrap_or(Value::Null);
        self.mcp_servers.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.mcp_servers.remove(name)
    }

    /// Set the `disabled` flag of an entry in place.
    ///
    /// Works on the raw JSON so that entries which fail validation can still
    /// be toggled. Returns `false` when the entry does not exist or is not a
    /// JSON object.
    pub fn set_disabled(&mut self, name: &str, disabled: bool) -> bool {
        match self.mcp_servers.get_mut(name) {
            Some(Value::Object(entry)) => {
                entry.insert("disabled".to_string(), Value::Bool(disabled));
                true
            }
            _ => false,
        }
    }

    /// Validate a single entry.
    pub fn get(&self, name: &str) -> Option<Result<McpServerConfig, ConfigValidationError>> {
        self.mcp_servers
            .get(name)
            .map(|value| McpServerConfig::from_value(value.clone()))
    }

    /// Validate every entry, splitting them into usable and rejected ones.
    pub fn validate(&self) -> ValidatedServers {
        let mut result = ValidatedServers::default();
        for (name, value) in &self.mcp_servers {
            match McpServerConfig::from_value(value.clone()) {
                Ok(config) => {
                    result.valid.insert(name.clone(), config);
                }
                Err(e) => result.invalid.push((name.clone(), e)),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stdio_entry_defaults() {
        let config = McpServerConfig::from_value(json!({
            "transportType": "stdio",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-everything"]
        }))
        .unwrap();

        assert!(!config.disabled);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert!(config.auto_approve.is_empty());
        assert_eq!(config.transport_type(), McpTransportType::Stdio);
    }

    #[test]
    fn test_transport_type_is_inferred() {
        let stdio = McpServerConfig::from_value(json!({ "command": "uvx" })).unwrap();
        assert_eq!(stdio.transport_type(), McpTransportType::Stdio);

        let sse = McpServerConfig::from_value(json!({ "url": "https://example.com/sse" })).unwrap();
        assert_eq!(sse.transport_type(), McpTransportType::Sse);

        let neither = McpServerConfig::from_value(json!({ "disabled": true }));
        assert_eq!(neither, Err(ConfigValidationError::MissingTransport));
    }

    #[test]
    fn test_timeout_below_floor_is_rejected() {
        let result = McpServerConfig::from_value(json!({ "command": "node", "timeout": 0.5 }));
        assert!(matches!(
            result,
            Err(ConfigValidationError::TimeoutBelowMinimum(_))
        ));

        let result = McpServerConfig::from_value(json!({ "command": "node", "timeout": 0 }));
        assert!(matches!(
            result,
            Err(ConfigValidationError::TimeoutBelowMinimum(_))
        ));

        let builder = McpServerConfig::stdio("node", vec![]).with_timeout_secs(0);
        assert!(builder.is_err());
    }

    #[test]
    fn test_timeout_at_floor_is_accepted() {
        let config =
            McpServerConfig::from_value(json!({ "command": "node", "timeout": 1 })).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = McpServerConfig::sse("not a url");
        assert!(matches!(
            result,
            Err(ConfigValidationError::InvalidUrl { .. })
        ));

        let result = McpServerConfig::sse("ftp://example.com/sse");
        assert!(matches!(
            result,
            Err(ConfigValidationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let result = McpServerConfig::from_value(json!({ "transportType": "stdio", "command": "  " }));
        assert_eq!(result, Err(ConfigValidationError::EmptyCommand));

        let result = McpServerConfig::from_value(json!({ "transportType": "stdio" }));
        assert!(matches!(
            result,
            Err(ConfigValidationError::MissingField { field: "command", .. })
        ));
    }

    #[test]
    fn test_written_entry_uses_persisted_shape() {
        let config = McpServerConfig::sse("https://example.com/sse")
            .unwrap()
            .with_auto_approve(vec!["search".to_string()]);
        let value: Value = serde_json::from_str(&config.to_json_string()).unwrap();

        assert_eq!(value["transportType"], "sse");
        assert_eq!(value["url"], "https://example.com/sse");
        assert_eq!(value["disabled"], false);
        assert_eq!(value["timeout"], 60);
        assert_eq!(value["autoApprove"], json!(["search"]));
        assert!(value.get("command").is_none());
    }

    #[test]
    fn test_defaulted_timeout_compares_equal_to_explicit() {
        let implicit = McpServerConfig::from_value(json!({ "command": "node" })).unwrap();
        let explicit =
            McpServerConfig::from_value(json!({ "command": "node", "timeout": 60 })).unwrap();
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn test_document_validation_isolates_bad_entries() {
        let document: McpServersDocument = serde_json::from_value(json!({
            "mcpServers": {
                "good": { "command": "node", "args": ["server.js"] },
                "bad-timeout": { "command": "node", "timeout": 0 },
                "bad-shape": { "command": 42 }
            }
        }))
        .unwrap();

        let validated = document.validate();
        assert_eq!(validated.valid.len(), 1);
        assert!(validated.valid.contains_key("good"));
        assert_eq!(validated.invalid.len(), 2);
    }

    #[test]
    fn test_set_disabled_preserves_unknown_fields() {
        let mut document: McpServersDocument = serde_json::from_value(json!({
            "mcpServers": { "s1": { "command": "node", "note": "keep me" } }
        }))
        .unwrap();

        assert!(document.set_disabled("s1", true));
        assert!(!document.set_disabled("missing", true));

        let entry = &document.mcp_servers["s1"];
        assert_eq!(entry["disabled"], true);
        assert_eq!(entry["note"], "keep me");
        assert!(document.get("s1").unwrap().unwrap().disabled);
    }

    #[test]
    fn test_empty_document_deserializes() {
        let document: McpServersDocument = serde_json::from_str("{}").unwrap();
        assert!(document.is_empty());
    }
}
