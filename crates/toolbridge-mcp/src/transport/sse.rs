//! HTTP event-stream transport.
//!
//! The client opens a long-lived `GET` with `Accept: text/event-stream`. The
//! server's first `endpoint` event names the URL that JSON-RPC messages are
//! POSTed to; responses come back on the stream as `message` events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use url::Url;

use super::event_stream::EventStreamParser;
use super::jsonrpc::{PendingRequests, encode_notification};
use super::{AbortOnDrop, EventSink, Transport, TransportError};

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

fn is_event_stream(content_type: &str) -> bool {
    media_type(content_type).eq_ignore_ascii_case("text/event-stream")
}

/// Resolve the announced endpoint against the stream URL.
///
/// The endpoint must stay on the stream's origin; a server cannot redirect
/// requests to a third party.
pub(crate) fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, TransportError> {
    let endpoint = base.join(announced.trim()).map_err(|e| {
        TransportError::Protocol(format!("Invalid endpoint '{announced}': {e}"))
    })?;

    if endpoint.origin() != base.origin() {
        return Err(TransportError::Protocol(format!(
            "Endpoint origin does not match connection origin: {endpoint}"
        )));
    }

    Ok(endpoint)
}

/// Event-stream connection to a remote capability server.
pub struct SseTransport {
    http: reqwest::Client,
    endpoint: Url,
    rpc: Arc<PendingRequests>,
    stream_task: Mutex<Option<AbortOnDrop>>,
}

impl SseTransport {
    /// Open the event stream and wait for the endpoint announcement.
    pub async fn connect(
        http: reqwest::Client,
        url: &Url,
        sink: EventSink,
    ) -> Result<Self, TransportError> {
        let response = http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "SSE connect failed: status={}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !is_event_stream(content_type) {
            return Err(TransportError::Http(format!(
                "SSE connect failed: expected content-type text/event-stream, got {content_type}"
            )));
        }

        let rpc = Arc::new(PendingRequests::new(sink.server()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let stream_task = AbortOnDrop::spawn(pump_events(
            response,
            Arc::clone(&rpc),
            sink.clone(),
            endpoint_tx,
        ));

        let announced = endpoint_rx.await.map_err(|_| {
            TransportError::Protocol("Event stream ended before endpoint event".to_string())
        })?;
        let endpoint = resolve_endpoint(url, &announced)?;

        tracing::debug!(server_name = %sink.server(), %endpoint, "SSE endpoint announced");

        Ok(Self {
            http,
            endpoint,
            rpc,
            stream_task: Mutex::new(Some(stream_task)),
        })
    }

    async fn post(&self, body: String) -> Result<(), TransportError> {
        if self.rpc.is_closed() {
            return Err(TransportError::ChannelClosed);
        }

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "POST {} failed: status={}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }
}

async fn pump_events(
    response: reqwest::Response,
    rpc: Arc<PendingRequests>,
    sink: EventSink,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut parser = EventStreamParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                rpc.close().await;
                tracing::warn!(server_name = %sink.server(), error = %e, "SSE stream failed");
                sink.error(format!("SSE stream failed: {e}"));
                return;
            }
        };

        for event in parser.feed(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                }
                "message" => rpc.dispatch(&event.data).await,
                other => {
                    tracing::debug!(server_name = %sink.server(), event = other, "Ignoring SSE event");
                }
            }
        }
    }

    rpc.close().await;
    tracing::info!(server_name = %sink.server(), "SSE stream closed");
    sink.closed("SSE stream closed");
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.rpc
            .request(method, params, timeout, |body| self.post(body))
            .await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.post(encode_notification(method, params)?).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the handle aborts the stream before it can report a close.
        let task = self.stream_task.lock().await.take();
        drop(task);
        self.rpc.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionEvent, EVENT_BUFFER};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// How the local test server treats the stream and message requests.
    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        /// Announce the endpoint and answer every request on the stream.
        Answer,
        /// Accept message POSTs and never respond to them.
        HangOnPost,
        /// Announce the endpoint, then end the stream.
        EndAfterEndpoint,
        WrongContentType,
        Unavailable,
    }

    type StreamFeed = Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>;

    async fn serve(behavior: Behavior) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let feed: StreamFeed = Arc::new(Mutex::new(Some(feed_rx)));

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle(socket, behavior, feed_tx.clone(), Arc::clone(&feed)));
            }
        });

        Url::parse(&format!("http://{addr}/sse")).unwrap()
    }

    async fn handle(
        socket: TcpStream,
        behavior: Behavior,
        feed_tx: mpsc::UnboundedSender<String>,
        feed: StreamFeed,
    ) {
        let mut reader = BufReader::new(socket);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();

        let mut content_length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).await.unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await.unwrap();
        let mut socket = reader.into_inner();

        if request_line.starts_with("GET") {
            match behavior {
                Behavior::WrongContentType => {
                    let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}";
                    socket.write_all(response.as_bytes()).await.unwrap();
                    return;
                }
                Behavior::Unavailable => {
                    let response = "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
                    socket.write_all(response.as_bytes()).await.unwrap();
                    return;
                }
                _ => {}
            }

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket
                .write_all(b"event: endpoint\ndata: /messages?sessionId=1\n\n")
                .await
                .unwrap();

            if matches!(behavior, Behavior::EndAfterEndpoint) {
                let _ = socket.shutdown().await;
                return;
            }

            let Some(mut messages) = feed.lock().await.take() else {
                return;
            };
            while let Some(data) = messages.recv().await {
                let event = format!("event: message\ndata: {data}\n\n");
                if socket.write_all(event.as_bytes()).await.is_err() {
                    return;
                }
            }
            return;
        }

        if matches!(behavior, Behavior::HangOnPost) {
            std::future::pending::<()>().await;
        }

        let message: Value = serde_json::from_slice(&body).unwrap();
        if let Some(id) = message.get("id") {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "echo": message["method"] }
            });
            let _ = feed_tx.send(reply.to_string());
        }
        let response = "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
        let _ = socket.write_all(response.as_bytes()).await;
    }

    async fn connect(url: &Url) -> (Result<SseTransport, TransportError>, mpsc::Receiver<ConnectionEvent>) {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let result = SseTransport::connect(http, url, EventSink::new("remote", 1, tx)).await;
        (result, rx)
    }

    #[tokio::test]
    async fn test_responses_routed_from_stream() {
        let url = serve(Behavior::Answer).await;
        let (transport, _events) = connect(&url).await;
        let transport = transport.unwrap();

        assert_eq!(
            transport.endpoint.as_str(),
            format!("{}messages?sessionId=1", url.join("/").unwrap())
        );

        transport
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        let result = transport
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({ "echo": "tools/list" }));

        transport.close().await.unwrap();
        let late = transport
            .request("tools/list", None, Duration::from_secs(5))
            .await;
        assert!(matches!(late, Err(TransportError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_non_event_stream_rejected() {
        let url = serve(Behavior::WrongContentType).await;
        let (result, _events) = connect(&url).await;

        match result {
            Err(TransportError::Http(message)) => {
                assert!(message.contains("expected content-type text/event-stream"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_error_status_rejected() {
        let url = serve(Behavior::Unavailable).await;
        let (result, _events) = connect(&url).await;

        match result {
            Err(TransportError::Http(message)) => assert!(message.contains("503")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_stream_end_reports_closed() {
        let url = serve(Behavior::EndAfterEndpoint).await;
        let (transport, mut events) = connect(&url).await;
        let transport = transport.unwrap();

        match events.recv().await.unwrap() {
            ConnectionEvent::Closed { reason, .. } => assert_eq!(reason, "SSE stream closed"),
            other => panic!("unexpected event: {other:?}"),
        }

        let err = transport
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_unanswered_post_times_out() {
        let url = serve(Behavior::HangOnPost).await;
        let (transport, _events) = connect(&url).await;
        let transport = transport.unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.request("tools/call", None, Duration::from_millis(200)),
        )
        .await
        .expect("request should be bounded by its own timeout");

        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_relative_endpoint_resolved() {
        let base = Url::parse("https://tools.example.com/mcp/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "/mcp/messages?sessionId=1").unwrap();
        assert_eq!(
            endpoint.as_str(),
            "https://tools.example.com/mcp/messages?sessionId=1"
        );
    }

    #[test]
    fn test_cross_origin_endpoint_rejected() {
        let base = Url::parse("https://tools.example.com/sse").unwrap();
        let err = resolve_endpoint(&base, "https://evil.example.net/messages").unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_content_type_parameters_ignored() {
        assert!(is_event_stream("text/event-stream; charset=utf-8"));
        assert!(is_event_stream("Text/Event-Stream"));
        assert!(!is_event_stream("application/json"));
    }
}
