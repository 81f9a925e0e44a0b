//! Transports to capability servers.
//!
//! Two wire variants exist:
//!
//! - [`StdioTransport`] spawns a subprocess and speaks line-delimited JSON-RPC
//!   over its stdin/stdout
//! - [`SseTransport`] opens an HTTP event stream and POSTs requests to the
//!   endpoint the server announces
//!
//! Both report asynchronous failures as [`ConnectionEvent`]s on a channel
//! owned by the manager instead of surfacing them to whoever happens to be
//! awaiting a request.

pub mod event_stream;
mod jsonrpc;
mod sse;
mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toolbridge_core::{McpServerConfig, McpTransportConfig};

use crate::stderr::{KeywordClassifier, StderrClassifier};

pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Generation number of a record's current transport.
pub type ConnectionId = u64;

/// Capacity of a manager's event channel.
pub const EVENT_BUFFER: usize = 256;

/// Sender half of the manager's event channel.
pub type EventSender = mpsc::Sender<ConnectionEvent>;

/// Errors raised by transports and sessions.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to spawn MCP server process: {0}")]
    Spawn(String),

    #[error("Failed to communicate with MCP server: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON serialization error: {0}")]
    Json(String),

    #[error("Request '{method}' timed out after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("Connection closed")]
    ChannelClosed,

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Asynchronous notification from a live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The peer went away (process exit, stream end).
    Closed {
        server: String,
        connection: ConnectionId,
        reason: String,
    },
    /// The transport failed and will not recover.
    Error {
        server: String,
        connection: ConnectionId,
        error: String,
    },
    /// A stderr line classified as diagnostic. Does not affect status.
    Diagnostic {
        server: String,
        connection: ConnectionId,
        line: String,
    },
}

impl ConnectionEvent {
    pub fn server(&self) -> &str {
        match self {
            Self::Closed { server, .. }
            | Self::Error { server, .. }
            | Self::Diagnostic { server, .. } => server,
        }
    }

    pub const fn connection(&self) -> ConnectionId {
        match self {
            Self::Closed { connection, .. }
            | Self::Error { connection, .. }
            | Self::Diagnostic { connection, .. } => *connection,
        }
    }
}

/// Identity of one transport, used to tag the events it emits.
#[derive(Debug, Clone)]
pub struct EventSink {
    server: String,
    connection: ConnectionId,
    events: EventSender,
}

impl EventSink {
    pub fn new(server: impl Into<String>, connection: ConnectionId, events: EventSender) -> Self {
        Self {
            server: server.into(),
            connection,
            events,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn closed(&self, reason: impl Into<String>) {
        self.emit(ConnectionEvent::Closed {
            server: self.server.clone(),
            connection: self.connection,
            reason: reason.into(),
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(ConnectionEvent::Error {
            server: self.server.clone(),
            connection: self.connection,
            error: error.into(),
        });
    }

    /// Diagnostics are dropped while the manager is behind on events.
    pub fn diagnostic(&self, line: impl Into<String>) {
        let event = ConnectionEvent::Diagnostic {
            server: self.server.clone(),
            connection: self.connection,
            line: line.into(),
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            tracing::debug!(server_name = %self.server, "Event queue full, dropping diagnostic");
        }
    }

    /// Lifecycle events are never dropped; a full queue defers delivery.
    fn emit(&self, event: ConnectionEvent) {
        // The manager dropping its receiver means nobody cares anymore.
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            let events = self.events.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = events.send(event).await;
                });
            }
        }
    }
}

/// A message channel to one capability server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    /// Tear the channel down. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports for server configurations.
///
/// The manager only ever talks to this trait, so tests can substitute
/// scripted transports for real processes and sockets.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        config: &McpServerConfig,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector that spawns real subprocesses and event streams.
pub struct DefaultConnector {
    classifier: Arc<dyn StderrClassifier>,
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::default()),
            http: reqwest::Client::new(),
        }
    }

    /// Replace the stderr classifier used for stdio servers.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn StderrClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for DefaultConnector {
    async fn connect(
        &self,
        config: &McpServerConfig,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match &config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                tracing::debug!(server_name = %sink.server(), %command, "Creating stdio transport");
                let transport =
                    StdioTransport::spawn(command, args, env, sink, Arc::clone(&self.classifier))?;
                Ok(Box::new(transport))
            }
            McpTransportConfig::Sse { url } => {
                tracing::debug!(server_name = %sink.server(), %url, "Creating SSE transport");
                let transport = SseTransport::connect(self.http.clone(), url, sink).await?;
                Ok(Box::new(transport))
            }
        }
    }
}

/// Background task that is aborted when the owner goes away.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
