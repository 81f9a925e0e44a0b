//! Connection manager for one user's capability servers.
//!
//! A single actor task owns every connection record. Mutating operations are
//! sent to it as commands and applied strictly one at a time, interleaved
//! with the connection events transports emit. After every change the actor
//! publishes an immutable snapshot, which is what [`McpManager::get_servers`]
//! and [`McpManager::call_tool`] read, so neither waits behind a slow
//! reconciliation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use toolbridge_core::{
    DEFAULT_TIMEOUT_SECONDS, McpConfigStore, McpServer, McpServerConfig, McpServerStatus,
    McpServersDocument, McpServiceError, McpToolCallResult,
};

use crate::capabilities::{Capabilities, fetch_capabilities};
use crate::catalog::{self, QualifiedTool};
use crate::reconciler::{self, Action, RecordState};
use crate::session::{CONNECT_TIMEOUT, Session};
use crate::transport::{
    ConnectionEvent, ConnectionId, EVENT_BUFFER, EventSender, EventSink, TransportConnector,
    TransportError,
};

/// Number of stderr diagnostics kept per record.
pub const MAX_DIAGNOSTICS: usize = 20;

const COMMAND_BUFFER: usize = 32;

type Reply<T = ()> = oneshot::Sender<Result<T, McpServiceError>>;

enum Command {
    Initialize(Reply),
    AddRemote {
        name: String,
        url: String,
        reply: Reply,
    },
    AddStdio(Reply),
    Toggle {
        name: String,
        disabled: bool,
        reply: Reply,
    },
    Restart {
        name: String,
        reply: Reply,
    },
    Delete {
        name: String,
        reply: Reply,
    },
    DisconnectAll(Reply),
}

/// Published state of one record.
#[derive(Clone)]
struct PublishedRecord {
    server: McpServer,
    session: Option<Arc<Session>>,
}

type Snapshot = Arc<BTreeMap<String, PublishedRecord>>;

/// Handle to a user's connection manager.
///
/// Dropping the last handle stops the actor, which closes every transport.
pub struct McpManager {
    user_id: String,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl McpManager {
    /// Create a manager and start its actor. Nothing is connected until
    /// [`initialize`](Self::initialize) runs.
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn McpConfigStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let user_id = user_id.into();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let actor = ManagerActor {
            user_id: user_id.clone(),
            store,
            connector,
            records: BTreeMap::new(),
            next_connection: 1,
            events_tx,
            snapshot_tx,
        };
        tokio::spawn(actor.run(commands_rx, events_rx));

        Self {
            user_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Load the user's configuration and connect every enabled server.
    pub async fn initialize(&self) -> Result<(), McpServiceError> {
        self.send(Command::Initialize).await
    }

    /// All servers, enabled and disabled, sorted by name.
    pub fn get_servers(&self) -> Vec<McpServer> {
        self.snapshot
            .borrow()
            .values()
            .map(|record| record.server.clone())
            .collect()
    }

    pub fn get_server(&self, name: &str) -> Option<McpServer> {
        self.snapshot
            .borrow()
            .get(name)
            .map(|record| record.server.clone())
    }

    /// Persist a new event-stream server and connect to it.
    pub async fn add_remote_server(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<(), McpServiceError> {
        let (name, url) = (name.into(), url.into());
        self.send(|reply| Command::AddRemote { name, url, reply })
            .await
    }

    /// Re-read the configuration after a stdio server was added to it
    /// out of band.
    pub async fn add_stdio_server(&self) -> Result<(), McpServiceError> {
        self.send(Command::AddStdio).await
    }

    pub async fn toggle_server_disabled(
        &self,
        name: impl Into<String>,
        disabled: bool,
    ) -> Result<(), McpServiceError> {
        let name = name.into();
        self.send(|reply| Command::Toggle {
            name,
            disabled,
            reply,
        })
        .await
    }

    /// Close and recreate one server's transport from its stored config.
    pub async fn restart_connection(&self, name: impl Into<String>) -> Result<(), McpServiceError> {
        let name = name.into();
        self.send(|reply| Command::Restart { name, reply }).await
    }

    pub async fn delete_server(&self, name: impl Into<String>) -> Result<(), McpServiceError> {
        let name = name.into();
        self.send(|reply| Command::Delete { name, reply }).await
    }

    /// Close every transport and forget all records.
    pub async fn disconnect_all(&self) {
        if let Err(e) = self.send(Command::DisconnectAll).await {
            // The actor already stopped, which closes everything itself.
            tracing::debug!(user_id = %self.user_id, error = %e, "MCP manager already stopped");
        }
    }

    /// Invoke a tool on a connected server.
    ///
    /// The per-call timeout comes from the server's configuration. Failures
    /// are returned as [`McpServiceError::Invocation`] with the underlying
    /// message untouched.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<McpToolCallResult, McpServiceError> {
        let record = self.snapshot.borrow().get(server_name).cloned();
        let Some(record) = record else {
            return Err(McpServiceError::Invocation(format!(
                "No connection found for server: {server_name}. Please make sure to use MCP servers available under 'Connected MCP Servers'."
            )));
        };

        if record.server.disabled {
            return Err(McpServiceError::Invocation(format!(
                "Server \"{server_name}\" is disabled and cannot be used"
            )));
        }

        let Some(session) = record.session else {
            return Err(McpServiceError::Invocation(format!(
                "Server \"{server_name}\" is not connected"
            )));
        };

        let timeout = effective_timeout(server_name, &record.server.config);
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };

        tracing::debug!(server_name, tool_name, timeout_ms = timeout.as_millis(), "Calling MCP tool");

        session
            .request::<McpToolCallResult>(
                "tools/call",
                Some(json!({ "name": tool_name, "arguments": arguments })),
                timeout,
            )
            .await
            .map_err(|e| {
                tracing::warn!(server_name, tool_name, error = %e, "MCP tool call failed");
                McpServiceError::Invocation(e.to_string())
            })
    }

    /// Tools of every enabled, connected server under their qualified names.
    pub fn active_tools(&self) -> Vec<QualifiedTool> {
        let snapshot = Arc::clone(&self.snapshot.borrow());
        catalog::collect_tools(snapshot.values().map(|record| &record.server))
    }

    /// Invoke a tool by its qualified `<server>__<tool>` name.
    pub async fn call_qualified_tool(
        &self,
        qualified_name: &str,
        arguments: Value,
    ) -> Result<McpToolCallResult, McpServiceError> {
        let Some(entry) = self
            .active_tools()
            .into_iter()
            .find(|tool| tool.qualified_name == qualified_name)
        else {
            return Err(McpServiceError::Invocation(format!(
                "Unknown tool \"{qualified_name}\""
            )));
        };

        self.call_tool(&entry.server_name, &entry.tool.name, arguments)
            .await
    }

    async fn send(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), McpServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    fn unavailable(&self) -> McpServiceError {
        McpServiceError::Unavailable(format!("manager for user {} has stopped", self.user_id))
    }
}

/// Per-call timeout from a record's serialized configuration.
fn effective_timeout(server_name: &str, config_json: &str) -> Duration {
    match McpServerConfig::from_json_str(config_json) {
        Ok(config) => config.timeout,
        Err(e) => {
            tracing::warn!(
                server_name,
                error = %e,
                "Failed to parse timeout configuration, using default"
            );
            Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)
        }
    }
}

/// Manager-side bookkeeping for one named server.
struct ConnectionRecord {
    config: McpServerConfig,
    config_json: String,
    session: Option<Arc<Session>>,
    connection: Option<ConnectionId>,
    status: McpServerStatus,
    error: Option<String>,
    capabilities: Capabilities,
    diagnostics: VecDeque<String>,
}

impl ConnectionRecord {
    fn new(config: McpServerConfig) -> Self {
        Self {
            config_json: config.to_json_string(),
            config,
            session: None,
            connection: None,
            status: McpServerStatus::Disconnected,
            error: None,
            capabilities: Capabilities::default(),
            diagnostics: VecDeque::new(),
        }
    }

    fn state(&self) -> RecordState {
        RecordState {
            config: self.config.clone(),
        }
    }

    fn set_config(&mut self, config: McpServerConfig) {
        self.config_json = config.to_json_string();
        self.config = config;
    }

    fn push_diagnostic(&mut self, line: String) {
        if self.diagnostics.len() == MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(line);
    }

    fn publish(&self, name: &str) -> PublishedRecord {
        PublishedRecord {
            server: McpServer {
                name: name.to_string(),
                config: self.config_json.clone(),
                status: self.status,
                error: self.error.clone(),
                tools: self.capabilities.tools.clone(),
                resources: self.capabilities.resources.clone(),
                resource_templates: self.capabilities.resource_templates.clone(),
                disabled: self.config.disabled,
                timeout: self.config.timeout.as_secs(),
                diagnostics: self.diagnostics.iter().cloned().collect(),
            },
            session: self.session.clone(),
        }
    }
}

struct ManagerActor {
    user_id: String,
    store: Arc<dyn McpConfigStore>,
    connector: Arc<dyn TransportConnector>,
    records: BTreeMap<String, ConnectionRecord>,
    next_connection: ConnectionId,
    events_tx: EventSender,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl ManagerActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        self.disconnect_all().await;
        tracing::debug!(user_id = %self.user_id, "MCP manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize(reply) => {
                let result = self.initialize().await;
                let _ = reply.send(result);
            }
            Command::AddRemote { name, url, reply } => {
                let result = self.add_remote_server(&name, &url).await;
                let _ = reply.send(result);
            }
            Command::AddStdio(reply) => {
                let result = self.reload().await;
                let _ = reply.send(result);
            }
            Command::Toggle {
                name,
                disabled,
                reply,
            } => {
                let result = self.toggle_server_disabled(&name, disabled).await;
                let _ = reply.send(result);
            }
            Command::Restart { name, reply } => {
                let result = self.restart_connection(&name).await;
                let _ = reply.send(result);
            }
            Command::Delete { name, reply } => {
                let result = self.delete_server(&name).await;
                let _ = reply.send(result);
            }
            Command::DisconnectAll(reply) => {
                self.disconnect_all().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn handle_event(&mut self, event: ConnectionEvent) {
        let name = event.server().to_string();
        let Some(record) = self.records.get_mut(&name) else {
            return;
        };
        if record.connection != Some(event.connection()) {
            tracing::debug!(server_name = %name, connection = event.connection(), "Ignoring event from replaced connection");
            return;
        }

        let dropped = match event {
            ConnectionEvent::Diagnostic { line, .. } => {
                record.push_diagnostic(line);
                None
            }
            // A record without a session already reported its failure.
            ConnectionEvent::Closed { .. } | ConnectionEvent::Error { .. }
                if record.session.is_none() =>
            {
                return;
            }
            ConnectionEvent::Closed { reason, .. } => {
                tracing::warn!(server_name = %name, %reason, "MCP connection closed");
                record.status = McpServerStatus::Disconnected;
                record.error = Some(reason);
                record.session.take()
            }
            ConnectionEvent::Error { error, .. } => {
                tracing::error!(server_name = %name, %error, "MCP transport error");
                record.status = McpServerStatus::Disconnected;
                record.error = Some(error);
                record.session.take()
            }
        };

        close_session(&name, dropped).await;
        self.publish();
    }

    async fn initialize(&mut self) -> Result<(), McpServiceError> {
        let document = self.store.read(&self.user_id).await?;
        let server_count = document.len();

        // Servers whose connect failed earlier are treated as new, so that a
        // repeated initialize retries them.
        self.records.retain(|_, record| {
            record.config.disabled
                || record.session.is_some()
                || record.status != McpServerStatus::Disconnected
        });

        self.reconcile(&document).await?;
        tracing::info!(user_id = %self.user_id, server_count, "MCP servers initialized");
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), McpServiceError> {
        let document = self.store.read(&self.user_id).await?;
        self.reconcile(&document).await
    }

    async fn add_remote_server(&mut self, name: &str, url: &str) -> Result<(), McpServiceError> {
        if name.trim().is_empty() {
            return Err(McpServiceError::Validation(
                "Server name is required".to_string(),
            ));
        }

        let mut document = self.store.read(&self.user_id).await?;
        if document.contains(name) {
            return Err(McpServiceError::Validation(format!(
                "An MCP server with the name \"{name}\" already exists"
            )));
        }

        let config = McpServerConfig::sse(url)?;
        document.insert(name, config);
        self.store.write(&self.user_id, &document).await?;

        tracing::info!(user_id = %self.user_id, server_name = %name, %url, "Added remote MCP server");
        self.reconcile(&document).await
    }

    async fn toggle_server_disabled(
        &mut self,
        name: &str,
        disabled: bool,
    ) -> Result<(), McpServiceError> {
        let mut document = self.store.read(&self.user_id).await?;
        if !document.set_disabled(name, disabled) {
            return Err(not_found(name));
        }
        self.store.write(&self.user_id, &document).await?;

        tracing::info!(user_id = %self.user_id, server_name = %name, disabled, "Toggled MCP server");
        self.reconcile(&document).await
    }

    async fn restart_connection(&mut self, name: &str) -> Result<(), McpServiceError> {
        let Some(record) = self.records.get(name) else {
            return Err(not_found(name));
        };
        if record.config.disabled {
            return Err(McpServiceError::Validation(format!(
                "Server \"{name}\" is disabled and cannot be restarted"
            )));
        }

        let config = record.config.clone();
        tracing::info!(user_id = %self.user_id, server_name = %name, "Restarting MCP server");
        self.connect(name, config).await.map_err(|e| {
            McpServiceError::Transport(format!("Failed to restart MCP server \"{name}\": {e}"))
        })
    }

    async fn delete_server(&mut self, name: &str) -> Result<(), McpServiceError> {
        let mut document = self.store.read(&self.user_id).await?;
        if document.remove(name).is_none() {
            return Err(not_found(name));
        }
        self.store.write(&self.user_id, &document).await?;

        tracing::info!(user_id = %self.user_id, server_name = %name, "Deleted MCP server");
        self.reconcile(&document).await
    }

    /// Bring the records in line with `document`.
    ///
    /// Every action is attempted; the first failure to connect a new server
    /// is returned once the pass is complete.
    async fn reconcile(&mut self, document: &McpServersDocument) -> Result<(), McpServiceError> {
        let validated = document.validate();
        for (name, error) in &validated.invalid {
            tracing::warn!(
                user_id = %self.user_id,
                server_name = %name,
                error = %error,
                "Skipping invalid MCP server configuration"
            );
        }

        let current: BTreeMap<String, RecordState> = self
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.state()))
            .collect();

        let mut first_failure = None;
        for action in reconciler::plan(&current, &validated.valid) {
            if let Err(e) = self.apply(action).await {
                first_failure.get_or_insert(e);
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    async fn apply(&mut self, action: Action) -> Result<(), McpServiceError> {
        match action {
            Action::Remove { name } => {
                let session = self
                    .records
                    .remove(&name)
                    .and_then(|mut record| record.session.take());
                close_session(&name, session).await;
                self.publish();
                tracing::info!(server_name = %name, "Removed MCP server");
            }
            Action::CreateDisabled { name, config } => {
                let previous = self.records.insert(name.clone(), ConnectionRecord::new(config));
                close_session(&name, previous.and_then(|mut record| record.session.take())).await;
                self.publish();
            }
            Action::Disable { name, config } => {
                let session = self.records.get_mut(&name).and_then(|record| {
                    record.set_config(config);
                    record.status = McpServerStatus::Disconnected;
                    record.error = None;
                    record.session.take()
                });
                close_session(&name, session).await;
                self.publish();
                tracing::info!(server_name = %name, "Disconnected disabled MCP server");
            }
            Action::Connect { name, config } => {
                self.connect(&name, config).await.map_err(|e| {
                    McpServiceError::Transport(format!(
                        "Failed to connect to MCP server \"{name}\": {e}"
                    ))
                })?;
            }
            Action::Reconnect { name, config } => match self.connect(&name, config).await {
                Ok(()) => {
                    tracing::info!(server_name = %name, "Reconnected MCP server with updated config");
                }
                Err(e) => {
                    tracing::error!(server_name = %name, error = %e, "Failed to reconnect MCP server");
                }
            },
            Action::Enable { name, config } => match self.connect(&name, config).await {
                Ok(()) => {
                    tracing::info!(server_name = %name, "Re-enabled and connected MCP server");
                }
                Err(e) => {
                    tracing::error!(server_name = %name, error = %e, "Failed to connect re-enabled MCP server");
                }
            },
        }
        Ok(())
    }

    /// Replace the record for `name` with a fresh connection attempt.
    ///
    /// On failure the record stays, disconnected, with the error message.
    async fn connect(&mut self, name: &str, config: McpServerConfig) -> Result<(), TransportError> {
        let previous = self
            .records
            .get_mut(name)
            .and_then(|record| record.session.take());
        close_session(name, previous).await;

        let connection = self.next_connection;
        self.next_connection += 1;

        let mut record = ConnectionRecord::new(config.clone());
        record.status = McpServerStatus::Connecting;
        record.connection = Some(connection);
        self.records.insert(name.to_string(), record);
        self.publish();

        let sink = EventSink::new(name, connection, self.events_tx.clone());
        let result = open_session(self.connector.as_ref(), name, &config, sink).await;

        let outcome = match (self.records.get_mut(name), result) {
            (Some(record), Ok((session, capabilities))) => {
                tracing::info!(
                    server_name = %name,
                    tool_count = capabilities.tools.len(),
                    "MCP server connected"
                );
                record.session = Some(session);
                record.status = McpServerStatus::Connected;
                record.error = None;
                record.capabilities = capabilities;
                Ok(())
            }
            (Some(record), Err(e)) => {
                record.status = McpServerStatus::Disconnected;
                record.error = Some(e.to_string());
                Err(e)
            }
            (None, result) => result.map(|_| ()),
        };

        self.publish();
        outcome
    }

    async fn disconnect_all(&mut self) {
        let records = std::mem::take(&mut self.records);
        let count = records.len();

        let closes = records
            .into_iter()
            .filter_map(|(name, mut record)| record.session.take().map(|s| (name, s)))
            .map(|(name, session)| async move {
                let result = session.close().await;
                (name, result)
            });

        for (name, result) in join_all(closes).await {
            if let Err(e) = result {
                tracing::warn!(server_name = %name, error = %e, "Failed to close MCP connection");
            }
        }

        self.publish();
        tracing::info!(user_id = %self.user_id, server_count = count, "All MCP connections disconnected");
    }

    fn publish(&self) {
        let table: BTreeMap<String, PublishedRecord> = self
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.publish(name)))
            .collect();
        self.snapshot_tx.send_replace(Arc::new(table));
    }
}

fn not_found(name: &str) -> McpServiceError {
    McpServiceError::Validation(format!("{name} not found in MCP configuration"))
}

async fn open_session(
    connector: &dyn TransportConnector,
    name: &str,
    config: &McpServerConfig,
    sink: EventSink,
) -> Result<(Arc<Session>, Capabilities), TransportError> {
    // Connect, handshake and capability listing share one deadline.
    let deadline = Instant::now() + CONNECT_TIMEOUT;

    let transport = tokio::time::timeout_at(deadline, connector.connect(config, sink))
        .await
        .map_err(|_| connect_timeout("connect"))??;

    let session = Arc::new(Session::new(name, transport));
    let handshake = async {
        session.initialize().await?;
        Ok::<_, TransportError>(fetch_capabilities(&session, config).await)
    };

    match tokio::time::timeout_at(deadline, handshake).await {
        Ok(Ok(capabilities)) => Ok((session, capabilities)),
        Ok(Err(e)) => {
            close_session(name, Some(session)).await;
            Err(e)
        }
        Err(_) => {
            close_session(name, Some(session)).await;
            Err(connect_timeout("initialize"))
        }
    }
}

fn connect_timeout(method: &str) -> TransportError {
    TransportError::Timeout {
        method: method.to_string(),
        timeout: CONNECT_TIMEOUT,
    }
}

async fn close_session(name: &str, session: Option<Arc<Session>>) {
    if let Some(session) = session {
        if let Err(e) = session.close().await {
            tracing::warn!(server_name = %name, error = %e, "Failed to close MCP connection");
        }
    }
}
