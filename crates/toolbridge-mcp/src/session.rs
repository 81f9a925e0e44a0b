//! MCP session on top of a transport.
//!
//! Implements the client half of the protocol handshake and typed requests.
//! Reference: <https://spec.modelcontextprotocol.io/>

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::transport::{Transport, TransportError};

/// Protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound for opening a transport and completing the handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP initialize result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub capabilities: Value,
}

/// Server information from initialize.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// An open, possibly initialized, connection to one capability server.
pub struct Session {
    server: String,
    transport: Box<dyn Transport>,
}

impl Session {
    pub fn new(server: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            server: server.into(),
            transport,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": "toolbridge",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });

        let result: InitializeResult = self
            .request("initialize", Some(params), CONNECT_TIMEOUT)
            .await?;

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        tracing::info!(
            server_name = %self.server,
            protocol_version = %result.protocol_version,
            remote = result.server_info.as_ref().map_or("unknown", |info| info.name.as_str()),
            "MCP session initialized"
        );

        Ok(result)
    }

    /// Send a request and validate the response against `R`.
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<R, TransportError> {
        let value = self.transport.request(method, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| TransportError::InvalidResponse(format!("{method}: {e}")))
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockServer, MockTransport};

    #[tokio::test]
    async fn test_initialize_sends_handshake() {
        let server = MockServer::new();
        let session = Session::new("mock", Box::new(MockTransport::new(server.clone())));

        let result = session.initialize().await.unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);

        let calls = server.calls();
        assert_eq!(calls[0].0, "initialize");
        assert_eq!(calls[0].1.as_ref().unwrap()["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(calls[1].0, "notifications/initialized");
    }

    #[tokio::test]
    async fn test_invalid_response_rejected() {
        let server = MockServer::new().with_response("tools/call", json!({ "content": "nope" }));
        let session = Session::new("mock", Box::new(MockTransport::new(server)));

        let err = session
            .request::<toolbridge_core::McpToolCallResult>(
                "tools/call",
                None,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }
}
