//! MCP client session for one connection

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::settings::TransportSpec;
use crate::protocol::{ToolDescriptor, ToolsListResult};
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::{Error, Result};

/// Upper bound on `tools/list` pages followed for one listing
const MAX_LIST_PAGES: usize = 64;

/// Lazily started MCP session over one transport
pub struct McpClient {
    /// Display name (connection name)
    pub name: String,
    /// Resolved transport settings
    spec: TransportSpec,
    /// Transport, once started
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Serializes starts so concurrent callers spawn one session
    start_lock: tokio::sync::Mutex<()>,
    /// Request counter
    request_count: AtomicU64,
}

impl McpClient {
    /// Create a client; nothing is started until first use
    #[must_use]
    pub fn new(name: &str, spec: TransportSpec) -> Self {
        Self {
            name: name.to_string(),
            spec,
            transport: RwLock::new(None),
            start_lock: tokio::sync::Mutex::new(()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Transport settings this client was built from
    #[must_use]
    pub fn spec(&self) -> &TransportSpec {
        &self.spec
    }

    fn live_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .as_ref()
            .filter(|t| t.is_connected())
            .map(Arc::clone)
    }

    /// Connected transport, starting (or restarting) it if needed
    async fn ensure_started(&self) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = self.live_transport() {
            return Ok(transport);
        }

        let _guard = self.start_lock.lock().await;
        if let Some(transport) = self.live_transport() {
            return Ok(transport);
        }

        info!(client = %self.name, "Starting MCP session");
        let transport: Arc<dyn Transport> = match &self.spec {
            TransportSpec::Http {
                url,
                headers,
                mode,
                timeout,
            } => {
                let transport = HttpTransport::new(url, headers, *timeout, *mode)?;
                if let Err(e) = transport.initialize().await {
                    // stops the SSE reader, if one was spawned
                    let _ = transport.close().await;
                    return Err(e);
                }
                transport
            }
            TransportSpec::Stdio { command, timeout } => {
                let transport = StdioTransport::new(command.clone(), *timeout);
                transport.start().await?;
                transport
            }
        };

        *self.transport.write() = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Close the session, if any
    pub async fn stop(&self) -> Result<()> {
        let transport = self.transport.write().take();
        if let Some(t) = transport {
            info!(client = %self.name, "Stopping MCP session");
            t.close().await?;
        }
        Ok(())
    }

    /// Check if the session is live
    pub fn is_running(&self) -> bool {
        self.live_transport().is_some()
    }

    /// All tools of the server, following pagination
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let transport = self.ensure_started().await?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            self.request_count.fetch_add(1, Ordering::Relaxed);
            let result = transport.request("tools/list", params).await?.into_result()?;
            let page: ToolsListResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!(client = %self.name, count = tools.len(), "Tools listed");
                    return Ok(tools);
                }
            }
        }

        Err(Error::Protocol(format!(
            "'{}' kept paginating tools/list past {MAX_LIST_PAGES} pages",
            self.name
        )))
    }

    /// Call a tool and return the raw JSON-RPC envelope.
    ///
    /// Remote failures stay inside the envelope's `error` field; only
    /// transport problems are returned as `Err`.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        let transport = self.ensure_started().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let response = transport
            .request("tools/call", Some(json!({ "name": name, "arguments": args })))
            .await?;
        Ok(serde_json::to_value(response)?)
    }

    /// Client status
    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            name: self.name.clone(),
            running: self.is_running(),
            transport: match &self.spec {
                TransportSpec::Http { mode, .. } => format!("{mode:?}").to_lowercase(),
                TransportSpec::Stdio { .. } => "stdio".to_string(),
            },
            request_count: self.request_count.load(Ordering::Relaxed),
        }
    }
}

/// Client status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClientStatus {
    /// Connection name
    pub name: String,
    /// Whether the session is live
    pub running: bool,
    /// Transport kind
    pub transport: String,
    /// Total request count
    pub request_count: u64,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::transport::{HttpMode, StdioCommand};

    #[test]
    fn new_client_is_idle() {
        let client = McpClient::new(
            "Remote",
            TransportSpec::Http {
                url: "http://localhost:1/sse".into(),
                headers: HashMap::new(),
                mode: HttpMode::Sse,
                timeout: Duration::from_secs(1),
            },
        );
        let status = client.status();
        assert!(!status.running);
        assert_eq!(status.transport, "sse");
        assert_eq!(status.request_count, 0);
    }

    #[tokio::test]
    async fn failed_start_surfaces_error_and_stays_idle() {
        let client = McpClient::new(
            "Broken",
            TransportSpec::Stdio {
                command: StdioCommand {
                    program: "definitely-not-a-real-binary-4711".into(),
                    args: Vec::new(),
                    env: HashMap::new(),
                    cwd: None,
                },
                timeout: Duration::from_secs(1),
            },
        );
        assert!(client.list_tools().await.is_err());
        assert!(!client.is_running());
        assert!(client.stop().await.is_ok());
    }
}
