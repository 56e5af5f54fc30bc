//! Tool backends
//!
//! [`ToolBackend`] is the contract the federation layer talks to: list and
//! call for each backend family. [`TransportBackend`] implements it with the
//! built-in filesystem tools plus pooled MCP client sessions for HTTP, SSE
//! and stdio connections.

mod client;
mod filesystem;
mod pool;
mod settings;

pub use client::{ClientStatus, McpClient};
pub use filesystem::FilesystemTools;
pub use pool::ClientPool;
pub use settings::{TransportSpec, expand_config_strings, fingerprint};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{Connection, ConnectionType};
use crate::protocol::ToolDescriptor;
use crate::{Error, Result};

/// Backend operations the federation gateway depends on.
///
/// Listing a family that is not configured yields an empty list; calling
/// into one fails with [`Error::BackendUnavailable`]. Call results are raw
/// payloads; the gateway normalizes them.
#[async_trait]
pub trait ToolBackend: Send + Sync + 'static {
    /// Filesystem tools of a bot
    async fn list_fs_tools(&self, bot_id: &str) -> Result<Vec<ToolDescriptor>>;

    /// Call a filesystem tool in a bot's workspace
    async fn call_fs_tool(&self, bot_id: &str, name: &str, args: Value) -> Result<Value>;

    /// Tools of a streamable HTTP connection
    async fn list_http_tools(&self, connection: &Connection) -> Result<Vec<ToolDescriptor>>;

    /// Call a tool on a streamable HTTP connection
    async fn call_http_tool(&self, connection: &Connection, name: &str, args: Value) -> Result<Value>;

    /// Tools of an SSE connection
    async fn list_sse_tools(&self, connection: &Connection) -> Result<Vec<ToolDescriptor>>;

    /// Call a tool on an SSE connection
    async fn call_sse_tool(&self, connection: &Connection, name: &str, args: Value) -> Result<Value>;

    /// Tools of a stdio connection, run on behalf of a bot
    async fn list_stdio_tools(&self, bot_id: &str, connection: &Connection) -> Result<Vec<ToolDescriptor>>;

    /// Call a tool on a stdio connection, run on behalf of a bot
    async fn call_stdio_tool(
        &self,
        bot_id: &str,
        connection: &Connection,
        name: &str,
        args: Value,
    ) -> Result<Value>;
}

/// [`ToolBackend`] over real transports
pub struct TransportBackend {
    filesystem: Option<FilesystemTools>,
    pool: ClientPool,
    request_timeout: Duration,
}

impl TransportBackend {
    /// Create a backend. `filesystem` is `None` when filesystem tools are disabled.
    #[must_use]
    pub fn new(filesystem: Option<FilesystemTools>, request_timeout: Duration) -> Self {
        Self {
            filesystem,
            pool: ClientPool::new(),
            request_timeout,
        }
    }

    /// Create a backend from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let filesystem = config
            .filesystem
            .enabled
            .then(|| FilesystemTools::new(&config.filesystem.root));
        Self::new(filesystem, config.transport.request_timeout)
    }

    /// Status of every open client session
    #[must_use]
    pub fn sessions(&self) -> HashMap<String, ClientStatus> {
        self.pool.statuses()
    }

    /// Close every client session
    pub async fn shutdown(&self) {
        info!(sessions = self.pool.len(), "Closing client sessions");
        self.pool.stop_all().await;
    }

    fn filesystem(&self) -> Result<&FilesystemTools> {
        self.filesystem
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("filesystem tools are disabled".to_string()))
    }

    /// Pooled session for a connection.
    ///
    /// Stdio processes are per bot and run inside its workspace. HTTP and
    /// SSE calls carry no bot id and connection ids are only unique per bot,
    /// so those sessions are scoped by config fingerprint: bots share a
    /// session only when their connection configs are identical.
    fn client(&self, bot_id: Option<&str>, connection: &Connection, kind: ConnectionType) -> Result<Arc<McpClient>> {
        let scope = match bot_id {
            Some(bot) => bot.to_string(),
            None => format!("{kind}@{}", fingerprint(connection)),
        };
        self.pool.client(&scope, connection, || {
            let workspace = match (bot_id, &self.filesystem) {
                (Some(bot), Some(fs)) => Some(fs.workspace(bot)?),
                _ => None,
            };
            TransportSpec::from_connection(connection, kind, workspace.as_deref(), self.request_timeout)
        })
    }

    async fn list_remote(
        &self,
        bot_id: Option<&str>,
        connection: &Connection,
        kind: ConnectionType,
    ) -> Result<Vec<ToolDescriptor>> {
        let client = self.client(bot_id, connection, kind)?;
        let tools = client.list_tools().await?;
        debug!(connection = %connection.name, kind = %kind, tools = tools.len(), "Listed remote tools");
        Ok(tools)
    }

    async fn call_remote(
        &self,
        bot_id: Option<&str>,
        connection: &Connection,
        kind: ConnectionType,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        let client = self.client(bot_id, connection, kind)?;
        client.call_tool(name, args).await
    }
}

#[async_trait]
impl ToolBackend for TransportBackend {
    async fn list_fs_tools(&self, bot_id: &str) -> Result<Vec<ToolDescriptor>> {
        match &self.filesystem {
            Some(fs) => fs.list_tools(bot_id),
            None => Ok(Vec::new()),
        }
    }

    async fn call_fs_tool(&self, bot_id: &str, name: &str, args: Value) -> Result<Value> {
        self.filesystem()?.call(bot_id, name, args).await
    }

    async fn list_http_tools(&self, connection: &Connection) -> Result<Vec<ToolDescriptor>> {
        self.list_remote(None, connection, ConnectionType::Http).await
    }

    async fn call_http_tool(&self, connection: &Connection, name: &str, args: Value) -> Result<Value> {
        self.call_remote(None, connection, ConnectionType::Http, name, args)
            .await
    }

    async fn list_sse_tools(&self, connection: &Connection) -> Result<Vec<ToolDescriptor>> {
        self.list_remote(None, connection, ConnectionType::Sse).await
    }

    async fn call_sse_tool(&self, connection: &Connection, name: &str, args: Value) -> Result<Value> {
        self.call_remote(None, connection, ConnectionType::Sse, name, args)
            .await
    }

    async fn list_stdio_tools(&self, bot_id: &str, connection: &Connection) -> Result<Vec<ToolDescriptor>> {
        self.list_remote(Some(bot_id), connection, ConnectionType::Stdio)
            .await
    }

    async fn call_stdio_tool(
        &self,
        bot_id: &str,
        connection: &Connection,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        self.call_remote(Some(bot_id), connection, ConnectionType::Stdio, name, args)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn disabled_filesystem_lists_nothing_and_refuses_calls() {
        let backend = TransportBackend::new(None, TIMEOUT);

        assert!(backend.list_fs_tools("bot-1").await.unwrap().is_empty());
        let err = backend
            .call_fs_tool("bot-1", "read_file", json!({ "path": "a.txt" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn enabled_filesystem_lists_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let backend = TransportBackend::new(Some(FilesystemTools::new(dir.path())), TIMEOUT);

        let tools = backend.list_fs_tools("bot-1").await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"write_file"));
    }

    #[tokio::test]
    async fn misconfigured_connection_is_config_error() {
        // GIVEN: an http connection without a url
        let backend = TransportBackend::new(None, TIMEOUT);
        let conn = Connection::new("c1", "Broken", "http");

        // WHEN: its tools are listed
        let err = backend.list_http_tools(&conn).await.unwrap_err();

        // THEN: the error names the connection and no session is pooled
        assert!(matches!(err, Error::Config(ref m) if m.contains("Broken")));
        assert!(backend.sessions().is_empty());
    }

    #[tokio::test]
    async fn same_connection_id_in_two_bots_keeps_separate_sessions() {
        // GIVEN: two bots each owning a connection "web" at different URLs
        let backend = TransportBackend::new(None, TIMEOUT);
        let bot1_web = Connection::new("web", "Web", "http").with_config(json!({ "url": "http://one/mcp" }));
        let bot2_web = Connection::new("web", "Web", "http").with_config(json!({ "url": "http://two/mcp" }));

        // WHEN: their sessions are requested alternately
        let first = backend.client(None, &bot1_web, ConnectionType::Http).unwrap();
        let other = backend.client(None, &bot2_web, ConnectionType::Http).unwrap();
        let again = backend.client(None, &bot1_web, ConnectionType::Http).unwrap();

        // THEN: neither evicts the other
        assert_eq!(backend.sessions().len(), 2);
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn identical_http_configs_share_a_session() {
        let backend = TransportBackend::new(None, TIMEOUT);
        let conn = Connection::new("web", "Web", "sse").with_config(json!({ "url": "http://one/sse" }));

        let same = Connection::new("web", "Web", "sse").with_config(json!({ "url": "http://one/sse" }));

        let a = backend.client(None, &conn, ConnectionType::Sse).unwrap();
        let b = backend.client(None, &same, ConnectionType::Sse).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(backend.sessions().len(), 1);
    }

    #[tokio::test]
    async fn stdio_sessions_are_scoped_per_bot() {
        let dir = tempfile::tempdir().unwrap();
        let backend = TransportBackend::new(Some(FilesystemTools::new(dir.path())), TIMEOUT);
        let conn = Connection::new("c1", "Local", "stdio").with_config(json!({ "command": "cat" }));

        backend.client(Some("bot-1"), &conn, ConnectionType::Stdio).unwrap();
        backend.client(Some("bot-2"), &conn, ConnectionType::Stdio).unwrap();

        let sessions = backend.sessions();
        assert!(sessions.contains_key("bot-1/c1"));
        assert!(sessions.contains_key("bot-2/c1"));
    }
}
