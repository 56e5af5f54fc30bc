//! HTTP and SSE transport
//!
//! Two modes:
//! - **Streamable HTTP**: every request is a POST to the endpoint; the reply
//!   comes back as JSON or as a `text/event-stream` body.
//! - **SSE**: GET the endpoint, wait for the `endpoint` event, then POST
//!   requests to the announced message URL. Replies arrive either in the POST
//!   body or as `message` events on the still-open GET stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::sse::{SseEvent, SseParser};
use super::{Transport, initialize_params};
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
};
use crate::{Error, Result};

const PROTOCOL_HEADER: HeaderName = HeaderName::from_static("mcp-protocol-version");
const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

type Pending = DashMap<String, oneshot::Sender<JsonRpcResponse>>;

/// How requests reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// Direct POST to the endpoint
    Streamable,
    /// GET handshake announcing a message endpoint
    Sse,
}

/// HTTP transport for MCP servers using Streamable HTTP or SSE
pub struct HttpTransport {
    /// HTTP client (no global timeout; the SSE stream is long-lived)
    client: Client,
    /// Endpoint URL as configured
    base_url: String,
    /// Where requests are POSTed
    message_url: RwLock<Option<String>>,
    /// Custom headers, validated at construction
    headers: HeaderMap,
    /// Session ID (from the endpoint URL or response headers)
    session_id: RwLock<Option<String>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag, cleared by the SSE reader when the stream ends
    connected: Arc<AtomicBool>,
    /// Per-request timeout
    timeout: Duration,
    /// Transport mode
    mode: HttpMode,
    /// Requests waiting for a reply on the SSE stream
    pending: Arc<Pending>,
    /// SSE reader task
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        mode: HttpMode,
    ) -> Result<Arc<Self>> {
        Url::parse(url).map_err(|e| Error::Config(format!("Invalid URL '{url}': {e}")))?;

        let client = Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut custom = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for header '{key}': {e}")))?;
            custom.insert(name, value);
        }

        Ok(Arc::new(Self {
            client,
            base_url: url.to_string(),
            message_url: RwLock::new(None),
            headers: custom,
            session_id: RwLock::new(None),
            request_id: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(false)),
            timeout,
            mode,
            pending: Arc::new(DashMap::new()),
            reader: Mutex::new(None),
        }))
    }

    /// Connect and run the MCP `initialize` handshake
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        match self.mode {
            HttpMode::Streamable => {
                *self.message_url.write() = Some(self.base_url.clone());
                info!(url = %self.base_url, "Streamable HTTP mode - direct POST");
            }
            HttpMode::Sse => {
                let endpoint = self.establish_sse_connection().await?;
                let message_url = self.resolve_message_url(&endpoint)?;
                info!(sse_url = %self.base_url, message_url = %message_url, "SSE handshake complete");
                *self.message_url.write() = Some(message_url);
            }
        }

        let request = JsonRpcRequest::new(RequestId::Number(0), "initialize", Some(initialize_params()));
        let response = self.send_request(&request).await?;
        if let Some(err) = response.error {
            return Err(Error::Protocol(format!("Initialize failed: {}", err.message)));
        }

        self.notify("notifications/initialized", None).await?;
        self.connected.store(true, Ordering::Relaxed);
        debug!(url = %self.base_url, mode = ?self.mode, "HTTP transport initialized");

        Ok(())
    }

    /// Headers common to every request
    fn request_headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers.insert(PROTOCOL_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));

        if let Some(id) = self.session_id.read().as_deref() {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(SESSION_HEADER, value);
            }
        }

        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    /// GET the SSE endpoint, wait for the `endpoint` event and keep reading in the background
    async fn establish_sse_connection(self: &Arc<Self>) -> Result<String> {
        debug!(url = %self.base_url, "Establishing SSE connection");

        let response = self
            .client
            .get(&self.base_url)
            .headers(self.request_headers("text/event-stream"))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("SSE connection failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("SSE endpoint returned: {status}")));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(format!("Failed to read SSE chunk: {e}")))?;
            let mut events = parser.feed(&String::from_utf8_lossy(&chunk)).into_iter();

            if let Some(endpoint) = events.by_ref().find(|e| e.event == "endpoint") {
                let endpoint = endpoint.data.trim().to_string();
                debug!(endpoint = %endpoint, "Received message endpoint from SSE");
                self.capture_session_from_endpoint(&endpoint);

                for event in events {
                    dispatch_event(&self.pending, &event);
                }
                self.spawn_reader(stream, parser);
                return Ok(endpoint);
            }
        }

        Err(Error::Transport(
            "SSE stream ended without endpoint event. Server may not support MCP SSE protocol.".to_string(),
        ))
    }

    fn capture_session_from_endpoint(&self, endpoint: &str) {
        let parsed = Url::parse(endpoint).or_else(|_| Url::parse(&format!("http://localhost{endpoint}")));
        if let Ok(url) = parsed {
            if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == "session_id" || k == "sessionId") {
                debug!(session_id = %value, "Extracted session ID");
                *self.session_id.write() = Some(value.into_owned());
            }
        }
    }

    fn spawn_reader<S, B, E>(&self, mut stream: S, mut parser: SseParser)
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let pending = Arc::clone(&self.pending);
        let connected = Arc::clone(&self.connected);
        let url = self.base_url.clone();

        let handle = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in parser.feed(&String::from_utf8_lossy(bytes.as_ref())) {
                            dispatch_event(&pending, &event);
                        }
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "SSE stream error");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Relaxed);
            pending.clear();
            debug!(url = %url, "SSE reader task ended");
        });

        if let Some(old) = self.reader.lock().replace(handle) {
            old.abort();
        }
    }

    /// Resolve a potentially relative message URL against the SSE URL
    fn resolve_message_url(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }

        let base = Url::parse(&self.base_url).map_err(|e| Error::Transport(format!("Invalid SSE URL: {e}")))?;
        let resolved = base
            .join(endpoint)
            .map_err(|e| Error::Transport(format!("Failed to resolve endpoint URL: {e}")))?;

        Ok(resolved.to_string())
    }

    /// Get the message URL, falling back to the base URL if not set
    fn message_url(&self) -> String {
        self.message_url
            .read()
            .clone()
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// POST a request and wait for its reply
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let key = request.id.to_string();
        let waiter = (self.mode == HttpMode::Sse).then(|| {
            let (tx, rx) = oneshot::channel();
            self.pending.insert(key.clone(), tx);
            rx
        });

        let result = self.post_request(request, waiter).await;
        self.pending.remove(&key);
        result
    }

    async fn post_request(
        &self,
        request: &JsonRpcRequest,
        waiter: Option<oneshot::Receiver<JsonRpcResponse>>,
    ) -> Result<JsonRpcResponse> {
        let message_url = self.message_url();
        debug!(method = %request.method, url = %message_url, "Sending request");

        let response = self
            .client
            .post(&message_url)
            .headers(self.request_headers("application/json, text/event-stream"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::BackendTimeout(format!("{} to {message_url}", request.method))
                } else {
                    Error::Transport(format!("Request failed: {e}"))
                }
            })?;

        if self.session_id.read().is_none() {
            if let Some(id) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
                info!(session_id = %id, url = %message_url, "Stored session ID from response");
                *self.session_id.write() = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response: {e}")))?;

        if is_event_stream {
            return SseParser::parse_all(&body)
                .iter()
                .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(&event.data).ok())
                .find(|r| r.id.as_ref() == Some(&request.id))
                .ok_or_else(|| Error::Transport("No matching response in SSE body".to_string()));
        }

        if !body.trim().is_empty() && status != StatusCode::ACCEPTED {
            return serde_json::from_str(&body)
                .map_err(|e| Error::Transport(format!("Failed to parse response: {e}")));
        }

        let Some(rx) = waiter else {
            return Err(Error::Protocol(format!("Empty response to {}", request.method)));
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport("SSE stream closed before response".to_string())),
            Err(_) => Err(Error::BackendTimeout(format!("{} over SSE", request.method))),
        }
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        RequestId::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

/// Route a `message` event to the request waiting for it
fn dispatch_event(pending: &Pending, event: &SseEvent) {
    if event.event != "message" {
        return;
    }
    match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(response) => {
            if let Some(id) = &response.id {
                if let Some((_, sender)) = pending.remove(&id.to_string()) {
                    let _ = sender.send(response);
                }
            }
        }
        Err(e) => debug!(error = %e, "Ignoring non-response SSE message"),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message_url = self.message_url();
        let notification = JsonRpcNotification::new(method, params);

        let response = self
            .client
            .post(&message_url)
            .headers(self.request_headers("application/json, text/event-stream"))
            .timeout(self.timeout)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %message_url, "Notification failed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        let session_id = self.session_id.read().clone();
        if let (HttpMode::Streamable, Some(id)) = (self.mode, session_id) {
            let _ = self
                .client
                .delete(self.message_url())
                .header(SESSION_HEADER, id)
                .timeout(self.timeout)
                .send()
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str, mode: HttpMode) -> Arc<HttpTransport> {
        HttpTransport::new(url, &HashMap::new(), Duration::from_secs(5), mode).unwrap()
    }

    #[test]
    fn rejects_invalid_url() {
        let result = HttpTransport::new("not a url", &HashMap::new(), Duration::from_secs(1), HttpMode::Streamable);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_invalid_header() {
        let headers = HashMap::from([("Bad Header".to_string(), "x".to_string())]);
        let result = HttpTransport::new("http://localhost:1/mcp", &headers, Duration::from_secs(1), HttpMode::Streamable);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn resolves_relative_message_endpoint() {
        let t = transport("http://localhost:9000/sse", HttpMode::Sse);
        assert_eq!(
            t.resolve_message_url("/messages?session_id=abc").unwrap(),
            "http://localhost:9000/messages?session_id=abc"
        );
        assert_eq!(
            t.resolve_message_url("https://other.example/msg").unwrap(),
            "https://other.example/msg"
        );
    }

    #[test]
    fn session_id_extracted_from_endpoint() {
        let t = transport("http://localhost:9000/sse", HttpMode::Sse);
        t.capture_session_from_endpoint("/messages?session_id=s-42");
        assert_eq!(t.session_id.read().as_deref(), Some("s-42"));

        let headers = t.request_headers("application/json");
        assert_eq!(headers.get(SESSION_HEADER).unwrap(), "s-42");
        assert_eq!(headers.get(PROTOCOL_HEADER).unwrap(), PROTOCOL_VERSION);
    }

    #[test]
    fn custom_headers_are_sent() {
        let headers = HashMap::from([("Authorization".to_string(), "Bearer t0k".to_string())]);
        let t = HttpTransport::new("http://localhost:1/mcp", &headers, Duration::from_secs(1), HttpMode::Streamable).unwrap();
        assert_eq!(t.request_headers("application/json").get(header::AUTHORIZATION).unwrap(), "Bearer t0k");
    }

    #[tokio::test]
    async fn dispatch_routes_message_to_waiter() {
        let pending = Pending::new();
        let (tx, rx) = oneshot::channel();
        pending.insert("7".to_string(), tx);

        dispatch_event(
            &pending,
            &SseEvent {
                event: "message".into(),
                data: r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#.into(),
            },
        );

        let response = rx.await.unwrap();
        assert_eq!(response.id, Some(RequestId::Number(7)));
        assert!(pending.is_empty());
    }

    #[test]
    fn new_transport_is_not_connected() {
        assert!(!transport("http://localhost:1/mcp", HttpMode::Streamable).is_connected());
    }
}
