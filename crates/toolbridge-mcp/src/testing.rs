//! Scripted transports for tests.
//!
//! A [`MockConnector`] hands out [`MockTransport`]s backed by per-name
//! [`MockServer`] scripts. Servers count opens and closes and record every
//! message they receive, so tests can assert on transport churn without
//! spawning processes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use toolbridge_core::{McpServerConfig, McpTool};

use crate::session::PROTOCOL_VERSION;
use crate::transport::{EventSink, Transport, TransportConnector, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockState {
    responses: Mutex<HashMap<String, Result<Value, TransportError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    hangs: Mutex<HashSet<String>>,
    connect_error: Mutex<Option<TransportError>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    sink: Mutex<Option<EventSink>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Script for one named capability server.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<MockState>,
}

impl MockServer {
    /// A server that completes the handshake and advertises nothing.
    pub fn new() -> Self {
        let server = Self::default();
        {
            let mut responses = lock(&server.state.responses);
            responses.insert(
                "initialize".to_string(),
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": { "name": "mock", "version": "0.0.0" },
                    "capabilities": { "tools": {} }
                })),
            );
            responses.insert("tools/list".to_string(), Ok(json!({ "tools": [] })));
            responses.insert("resources/list".to_string(), Ok(json!({ "resources": [] })));
            responses.insert(
                "resources/templates/list".to_string(),
                Ok(json!({ "resourceTemplates": [] })),
            );
            responses.insert(
                "tools/call".to_string(),
                Ok(json!({ "content": [{ "type": "text", "text": "ok" }] })),
            );
        }
        server
    }

    #[must_use]
    pub fn with_response(self, method: &str, result: Value) -> Self {
        lock(&self.state.responses).insert(method.to_string(), Ok(result));
        self
    }

    #[must_use]
    pub fn with_error(self, method: &str, error: TransportError) -> Self {
        lock(&self.state.responses).insert(method.to_string(), Err(error));
        self
    }

    #[must_use]
    pub fn with_tools(self, tools: Vec<McpTool>) -> Self {
        self.with_response("tools/list", json!({ "tools": tools }))
    }

    /// Delay responses to `method`; requests with a shorter timeout fail.
    #[must_use]
    pub fn with_delay(self, method: &str, delay: Duration) -> Self {
        lock(&self.state.delays).insert(method.to_string(), delay);
        self
    }

    /// Never answer `method`, ignoring the request timeout, like a peer
    /// that accepts a message and goes silent.
    #[must_use]
    pub fn hanging(self, method: &str) -> Self {
        lock(&self.state.hangs).insert(method.to_string());
        self
    }

    /// Make every connection attempt fail with `error`.
    #[must_use]
    pub fn failing_connect(self, error: TransportError) -> Self {
        self.set_connect_error(Some(error));
        self
    }

    pub fn set_connect_error(&self, error: Option<TransportError>) {
        *lock(&self.state.connect_error) = error;
    }

    /// Number of transports opened for this server.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of transports closed for this server.
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every request and notification received, in order.
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        lock(&self.state.calls).clone()
    }

    /// Number of messages received for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.state.calls)
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Report that the most recent transport went away.
    pub fn emit_closed(&self, reason: &str) {
        if let Some(sink) = lock(&self.state.sink).as_ref() {
            sink.closed(reason);
        }
    }

    /// Report a diagnostic line on the most recent transport.
    pub fn emit_diagnostic(&self, line: &str) {
        if let Some(sink) = lock(&self.state.sink).as_ref() {
            sink.diagnostic(line);
        }
    }

    /// Sink of the most recent transport, for emitting events by hand.
    pub fn last_sink(&self) -> Option<EventSink> {
        lock(&self.state.sink).clone()
    }
}

/// Transport answering from a [`MockServer`] script.
pub struct MockTransport {
    server: MockServer,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(server: MockServer) -> Self {
        Self {
            server,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        lock(&self.server.state.calls).push((method.to_string(), params));

        let hangs = lock(&self.server.state.hangs).contains(method);
        if hangs {
            return std::future::pending().await;
        }

        let delay = lock(&self.server.state.delays).get(method).copied();
        if let Some(delay) = delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(TransportError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        }

        lock(&self.server.state.responses)
            .get(method)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Rpc {
                    code: -32601,
                    message: format!("Method not found: {method}"),
                })
            })
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        lock(&self.server.state.calls).push((method.to_string(), params));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Connector that looks servers up by name, creating default ones on demand.
#[derive(Clone, Default)]
pub struct MockConnector {
    servers: Arc<Mutex<HashMap<String, MockServer>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server(self, name: &str, server: MockServer) -> Self {
        lock(&self.servers).insert(name.to_string(), server);
        self
    }

    /// Script for `name`, created with defaults if it does not exist yet.
    pub fn server(&self, name: &str) -> MockServer {
        lock(&self.servers)
            .entry(name.to_string())
            .or_insert_with(MockServer::new)
            .clone()
    }

    pub fn total_opened(&self) -> usize {
        lock(&self.servers).values().map(MockServer::opened).sum()
    }

    pub fn total_closed(&self) -> usize {
        lock(&self.servers).values().map(MockServer::closed).sum()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        _config: &McpServerConfig,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let server = self.server(sink.server());

        let connect_error = lock(&server.state.connect_error).clone();
        if let Some(error) = connect_error {
            return Err(error);
        }

        server.state.opened.fetch_add(1, Ordering::SeqCst);
        *lock(&server.state.sink) = Some(sink);
        Ok(Box::new(MockTransport::new(server)))
    }
}
