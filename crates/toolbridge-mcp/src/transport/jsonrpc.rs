//! JSON-RPC 2.0 framing and request bookkeeping shared by both transports.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;

use super::TransportError;

/// JSON-RPC 2.0 request.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 notification.
#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Any incoming JSON-RPC message: response, request or notification.
#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

type Reply = Result<Value, TransportError>;

pub(crate) fn encode_notification(
    method: &str,
    params: Option<Value>,
) -> Result<String, TransportError> {
    let notification = JsonRpcNotification {
        jsonrpc: "2.0",
        method,
        params,
    };
    Ok(serde_json::to_string(&notification)?)
}

/// Outstanding requests of one transport, keyed by request id.
pub(crate) struct PendingRequests {
    server: String,
    next_id: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl PendingRequests {
    pub(crate) fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request through `send` and wait for the routed response.
    pub(crate) async fn request<F, Fut>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        send: F,
    ) -> Result<Value, TransportError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(TransportError::ChannelClosed);
            }
            pending.insert(id, tx);
        }

        // One deadline covers both writing the request and waiting for the reply.
        let deadline = Instant::now() + timeout;
        let exchange = async {
            if let Err(e) = send(message).await {
                return Err(e);
            }
            rx.await.unwrap_or(Err(TransportError::ChannelClosed))
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Route one incoming message to the request waiting for it.
    pub(crate) async fn dispatch(&self, raw: &str) {
        let message = match serde_json::from_str::<JsonRpcMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(server_name = %self.server, line = raw, error = %e, "Skipping non-JSON-RPC output");
                return;
            }
        };

        if let Some(method) = &message.method {
            // Server-initiated requests and notifications are not supported.
            tracing::debug!(server_name = %self.server, %method, "Ignoring server-initiated message");
            return;
        }

        let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
            tracing::debug!(server_name = %self.server, "Ignoring response without a numeric id");
            return;
        };

        let reply = match (message.error, message.result) {
            (Some(error), _) => Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(TransportError::Protocol(
                "Response has neither result nor error".to_string(),
            )),
        };

        let sender = self.pending.lock().await.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                tracing::debug!(server_name = %self.server, id, "Response for unknown or expired request");
            }
        }
    }

    /// Fail every outstanding request and refuse new ones.
    pub(crate) async fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, tx)| tx).collect()
        };

        for tx in drained {
            let _ = tx.send(Err(TransportError::ChannelClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_notification_omits_missing_params() {
        let line = encode_notification("notifications/initialized", None).unwrap();
        assert_eq!(
            line,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }

    #[tokio::test]
    async fn test_response_is_routed_by_id() {
        let pending = Arc::new(PendingRequests::new("test"));
        let (sent_tx, sent_rx) = oneshot::channel::<String>();

        let requester = Arc::clone(&pending);
        let call = tokio::spawn(async move {
            requester
                .request("tools/list", None, Duration::from_secs(5), |line| async move {
                    let _ = sent_tx.send(line);
                    Ok(())
                })
                .await
        });

        let sent: Value = serde_json::from_str(&sent_rx.await.unwrap()).unwrap();
        assert_eq!(sent["method"], "tools/list");
        let id = sent["id"].as_u64().unwrap();

        pending
            .dispatch(&json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": [] } }).to_string())
            .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, json!({ "tools": [] }));
    }

    #[tokio::test]
    async fn test_error_response_becomes_rpc_error() {
        let pending = Arc::new(PendingRequests::new("test"));
        let requester = Arc::clone(&pending);
        let call = tokio::spawn(async move {
            requester
                .request("tools/call", None, Duration::from_secs(5), |_| async { Ok(()) })
                .await
        });

        // First request id is always 1.
        while pending.pending.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }
        pending
            .dispatch(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad args"}}"#)
            .await;

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "MCP error -32602: bad args");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_entry() {
        let pending = PendingRequests::new("test");

        let err = pending
            .request("slow", None, Duration::from_millis(50), |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(pending.pending.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_a_send_that_never_completes() {
        let pending = PendingRequests::new("test");

        let started = Instant::now();
        let err = pending
            .request("tools/call", None, Duration::from_millis(200), |_| {
                std::future::pending::<Result<(), TransportError>>()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(pending.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_removes_pending_entry() {
        let pending = PendingRequests::new("test");

        let err = pending
            .request("tools/list", None, Duration::from_secs(5), |_| async {
                Err(TransportError::Http("POST failed: status=502".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Http(_)));
        assert!(pending.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_requests() {
        let pending = Arc::new(PendingRequests::new("test"));
        let requester = Arc::clone(&pending);
        let call = tokio::spawn(async move {
            requester
                .request("tools/list", None, Duration::from_secs(5), |_| async { Ok(()) })
                .await
        });

        while pending.pending.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }
        pending.close().await;

        assert!(matches!(
            call.await.unwrap(),
            Err(TransportError::ChannelClosed)
        ));

        let late = pending
            .request("tools/list", None, Duration::from_secs(5), |_| async { Ok(()) })
            .await;
        assert!(matches!(late, Err(TransportError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_server_requests_are_ignored() {
        let pending = PendingRequests::new("test");
        pending
            .dispatch(r#"{"jsonrpc":"2.0","id":99,"method":"ping"}"#)
            .await;
        pending.dispatch("npm WARN deprecated").await;
        assert!(pending.pending.lock().await.is_empty());
    }
}
