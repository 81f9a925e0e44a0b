//! Subprocess transport speaking line-delimited JSON-RPC.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::jsonrpc::{PendingRequests, encode_notification};
use super::{AbortOnDrop, EventSink, Transport, TransportError};
use crate::stderr::{StderrClassifier, StderrLevel};

/// Connection to a capability server running as a child process.
pub struct StdioTransport {
    server: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    rpc: Arc<PendingRequests>,
    tasks: Mutex<Vec<AbortOnDrop>>,
}

impl StdioTransport {
    /// Spawn `command args` and start the reader tasks.
    ///
    /// The child inherits this process's environment, then `env` is applied,
    /// then the inherited `PATH` is restored so configurations cannot hide
    /// system binaries.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        sink: EventSink,
        classifier: Arc<dyn StderrClassifier>,
    ) -> Result<Self, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Spawn(format!("Failed to spawn '{command}': {e} (args: {args:?})"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Spawn("Failed to get stderr".to_string()))?;

        let rpc = Arc::new(PendingRequests::new(sink.server()));
        let tasks = vec![
            AbortOnDrop::spawn(read_stdout(stdout, Arc::clone(&rpc), sink.clone())),
            AbortOnDrop::spawn(drain_stderr(stderr, sink.clone(), classifier)),
        ];

        tracing::debug!(
            server_name = %sink.server(),
            pid = child.id(),
            "Spawned stdio MCP server"
        );

        Ok(Self {
            server: sink.server().to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            rpc,
            tasks: Mutex::new(tasks),
        })
    }

    async fn write_line(&self, mut line: String) -> Result<(), TransportError> {
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::ChannelClosed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Read one `\n`-terminated line, decoding invalid UTF-8 lossily.
///
/// Returns `Ok(None)` at end of stream.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

async fn read_stdout(stdout: ChildStdout, rpc: Arc<PendingRequests>, sink: EventSink) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    rpc.dispatch(trimmed).await;
                }
            }
            Ok(None) => {
                rpc.close().await;
                tracing::info!(server_name = %sink.server(), "MCP server stdout closed");
                sink.closed("Server process exited");
                return;
            }
            Err(e) => {
                rpc.close().await;
                tracing::warn!(server_name = %sink.server(), error = %e, "Error reading MCP server stdout");
                sink.error(format!("Failed to read server output: {e}"));
                return;
            }
        }
    }
}

/// Drain stderr until the child closes it. Undecodable bytes are replaced,
/// never a reason to stop: dropping the pipe early fails the child's writes.
async fn drain_stderr(stderr: ChildStderr, sink: EventSink, classifier: Arc<dyn StderrClassifier>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        let line = match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(server_name = %sink.server(), error = %e, "Error reading MCP server stderr");
                return;
            }
        };

        match classifier.classify(&line) {
            StderrLevel::Info => {
                tracing::info!(server_name = %sink.server(), %line, "MCP server output");
            }
            StderrLevel::Diagnostic => {
                tracing::warn!(server_name = %sink.server(), %line, "MCP server stderr");
                sink.diagnostic(line);
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.rpc
            .request(method, params, timeout, |line| self.write_line(line))
            .await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.write_line(encode_notification(method, params)?).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Stop the readers first so the exit is not reported as a failure.
        self.tasks.lock().await.clear();
        self.stdin.lock().await.take();
        self.rpc.close().await;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match child.kill().await {
                Ok(()) => tracing::debug!(server_name = %self.server, "Stopped stdio MCP server"),
                Err(e) => {
                    tracing::debug!(server_name = %self.server, error = %e, "Stdio MCP server already gone");
                }
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::stderr::KeywordClassifier;
    use crate::transport::{ConnectionEvent, EVENT_BUFFER};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn spawn_shell(script: &str) -> (StdioTransport, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let transport = StdioTransport::spawn(
            "sh",
            &["-c".to_string(), script.to_string()],
            &BTreeMap::new(),
            EventSink::new("shell", 1, tx),
            Arc::new(KeywordClassifier::default()),
        )
        .unwrap();
        (transport, rx)
    }

    #[tokio::test]
    async fn test_request_round_trip_through_process() {
        // Answers the first request (id 1) regardless of its content.
        let (transport, _events) = spawn_shell(
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; sleep 5"#,
        );

        let result = transport
            .request("ping", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({ "ok": true }));

        transport.close().await.unwrap();
        // Idempotent.
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_reports_closed_and_diagnostics() {
        let (transport, mut events) = spawn_shell("echo 'Error: missing API key' >&2; exit 1");

        let mut saw_diagnostic = false;
        let mut saw_closed = false;
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Diagnostic { line, .. } => {
                    assert_eq!(line, "Error: missing API key");
                    saw_diagnostic = true;
                }
                ConnectionEvent::Closed { .. } => {
                    saw_closed = true;
                }
                ConnectionEvent::Error { .. } => {}
            }
            if saw_diagnostic && saw_closed {
                break;
            }
        }
        assert!(saw_closed);
        assert!(saw_diagnostic);

        let err = transport
            .request("ping", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::ChannelClosed | TransportError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stderr_keeps_server_alive() {
        let (transport, mut events) = spawn_shell(
            r#"printf '\377 error\n' >&2; sleep 0.3; echo 'still starting' >&2; read line; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; sleep 5"#,
        );

        let result = transport
            .request("ping", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({ "ok": true }));

        match events.recv().await.unwrap() {
            ConnectionEvent::Diagnostic { line, .. } => assert_eq!(line, "\u{FFFD} error"),
            other => panic!("unexpected event: {other:?}"),
        }

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (tx, _rx) = mpsc::channel(EVENT_BUFFER);
        let result = StdioTransport::spawn(
            "/definitely/not/a/binary",
            &[],
            &BTreeMap::new(),
            EventSink::new("missing", 1, tx),
            Arc::new(KeywordClassifier::default()),
        );
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }
}
