//! Stdio transport (subprocess speaking JSON-RPC over stdin/stdout)

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, trace};

use super::{Transport, initialize_params};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::{Error, Result};

/// What to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioCommand {
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

/// Stdio transport for subprocess MCP servers
pub struct StdioTransport {
    /// Child process
    child: Mutex<Option<Child>>,
    /// Pending requests waiting for response
    pending: Arc<DashMap<String, oneshot::Sender<JsonRpcResponse>>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag
    connected: Arc<AtomicBool>,
    /// Command to execute
    command: StdioCommand,
    /// Per-request timeout
    timeout: Duration,
    /// Writer handle
    writer: Mutex<Option<ChildStdin>>,
}

impl StdioTransport {
    /// Create a new stdio transport
    #[must_use]
    pub fn new(command: StdioCommand, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            child: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            request_id: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(false)),
            command,
            timeout,
            writer: Mutex::new(None),
        })
    }

    /// Spawn the subprocess and run the `initialize` handshake
    pub async fn start(&self) -> Result<()> {
        if self.command.program.trim().is_empty() {
            return Err(Error::Config("Empty command".to_string()));
        }

        if let Some(cwd) = &self.command.cwd {
            tokio::fs::create_dir_all(cwd).await?;
        }

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("Failed to spawn '{}': {e}", self.command.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdout".to_string()))?;
        let stderr = child.stderr.take();

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::Relaxed);

        let pending = Arc::clone(&self.pending);
        let connected = Arc::clone(&self.connected);
        let program = self.command.program.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Err(e) = handle_response(&pending, &line) {
                    error!(program = %program, error = %e, "Failed to handle response");
                }
            }
            connected.store(false, Ordering::Relaxed);
            pending.clear();
            debug!(program = %program, "Stdio reader task ended");
        });

        if let Some(stderr) = stderr {
            let program = self.command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(program = %program, "{line}");
                }
            });
        }

        if let Err(e) = self.initialize().await {
            let _ = self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Initialize the MCP connection
    async fn initialize(&self) -> Result<()> {
        let response = self.request("initialize", Some(initialize_params())).await?;

        if let Some(err) = response.error {
            return Err(Error::Protocol(format!("Initialize failed: {}", err.message)));
        }

        self.notify("notifications/initialized", None).await?;
        debug!(program = %self.command.program, "Stdio transport initialized");

        Ok(())
    }

    /// Write a message to stdin
    async fn write_message(&self, message: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(stdin) = writer.as_mut() else {
            return Err(Error::Transport("Not connected".to_string()));
        };
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        RequestId::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

/// Handle a response line from stdout
fn handle_response(pending: &DashMap<String, oneshot::Sender<JsonRpcResponse>>, line: &str) -> Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let response: JsonRpcResponse = serde_json::from_str(line)?;
    if let Some(id) = &response.id {
        if let Some((_, sender)) = pending.remove(&id.to_string()) {
            let _ = sender.send(response);
        }
    }

    Ok(())
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let key = id.to_string();
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let message = serde_json::to_string(&request)?;
        if let Err(e) = self.write_message(&message).await {
            self.pending.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport("Response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&key);
                Err(Error::BackendTimeout(format!("{method} on '{}'", self.command.program)))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_message(&message).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);

        *self.writer.lock().await = None;

        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.kill().await;
        }

        Ok(())
    }
}
