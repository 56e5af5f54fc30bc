//! Routes from public aliases back to the backend family that serves them

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::backend::ToolBackend;
use crate::connection::{Connection, ConnectionType};
use crate::protocol::ToolDescriptor;
use crate::{Error, Result};

/// Backend family a tool comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Built-in filesystem tools, one set per bot
    Fs,
    /// Streamable HTTP connection
    Http,
    /// SSE connection
    Sse,
    /// Stdio connection
    Stdio,
}

impl From<ConnectionType> for SourceKind {
    fn from(kind: ConnectionType) -> Self {
        match kind {
            ConnectionType::Http => Self::Http,
            ConnectionType::Sse => Self::Sse,
            ConnectionType::Stdio => Self::Stdio,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fs => "fs",
            Self::Http => "http",
            Self::Sse => "sse",
            Self::Stdio => "stdio",
        })
    }
}

impl SourceKind {
    /// List the tools of this family for a bot (and connection, where relevant)
    pub(crate) async fn list_tools(
        self,
        backend: &dyn ToolBackend,
        bot_id: &str,
        connection: Option<&Connection>,
    ) -> Result<Vec<ToolDescriptor>> {
        match self {
            Self::Fs => backend.list_fs_tools(bot_id).await,
            Self::Http => backend.list_http_tools(required(connection, self)?).await,
            Self::Sse => backend.list_sse_tools(required(connection, self)?).await,
            Self::Stdio => {
                backend
                    .list_stdio_tools(bot_id, required(connection, self)?)
                    .await
            }
        }
    }

    /// Invoke `name` (backend-local) on this family
    pub(crate) async fn call_tool(
        self,
        backend: &dyn ToolBackend,
        bot_id: &str,
        connection: Option<&Connection>,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        match self {
            Self::Fs => backend.call_fs_tool(bot_id, name, args).await,
            Self::Http => {
                backend
                    .call_http_tool(required(connection, self)?, name, args)
                    .await
            }
            Self::Sse => {
                backend
                    .call_sse_tool(required(connection, self)?, name, args)
                    .await
            }
            Self::Stdio => {
                backend
                    .call_stdio_tool(bot_id, required(connection, self)?, name, args)
                    .await
            }
        }
    }
}

fn required(connection: Option<&Connection>, kind: SourceKind) -> Result<&Connection> {
    connection.ok_or_else(|| Error::Internal(format!("{kind} route without connection")))
}

/// Where a public alias actually lives
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRoute {
    /// Backend family
    pub source: SourceKind,
    /// Backend-local tool name
    pub original_name: String,
    /// Owning connection; `None` for filesystem tools
    pub connection: Option<Connection>,
}

impl ToolRoute {
    /// Route to a filesystem tool
    pub fn filesystem(original_name: impl Into<String>) -> Self {
        Self {
            source: SourceKind::Fs,
            original_name: original_name.into(),
            connection: None,
        }
    }

    /// Route to a connection tool
    pub fn connection(kind: ConnectionType, original_name: impl Into<String>, connection: Connection) -> Self {
        Self {
            source: kind.into(),
            original_name: original_name.into(),
            connection: Some(connection),
        }
    }
}

/// Await `fut`, bounded by `timeout` when one is set
pub(crate) async fn within<T>(
    timeout: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::BackendTimeout(format!("{what} after {}ms", limit.as_millis())))?,
        None => fut.await,
    }
}
