//! Connection records and the directory that serves them per bot
//!
//! A [`Connection`] describes one remote tool backend a bot can reach. The
//! federation layer only reads these records; the `config` blob is opaque to
//! it and interpreted by the concrete backend alone.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Transport family a connection is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Streamable HTTP endpoint
    Http,
    /// Legacy Server-Sent-Events endpoint
    Sse,
    /// Subprocess spoken to over stdin/stdout
    Stdio,
}

impl ConnectionType {
    /// Parse a type tag. Unknown tags yield `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "sse" => Some(Self::Sse),
            "stdio" => Some(Self::Stdio),
            _ => None,
        }
    }

    /// Canonical tag
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
            Self::Stdio => "stdio",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted backend connection owned by one bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Identifier, unique per bot
    pub id: String,
    /// Human label, source of the alias prefix
    pub name: String,
    /// Transport type tag (`http`, `sse`, `stdio`); kept raw so unknown kinds survive loading
    #[serde(rename = "type")]
    pub connection_type: String,
    /// Only active connections are queried
    #[serde(default = "default_active")]
    pub active: bool,
    /// Transport-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

impl Connection {
    /// Create an active connection with an empty config
    pub fn new(id: impl Into<String>, name: impl Into<String>, connection_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connection_type: connection_type.into(),
            active: true,
            config: Map::new(),
        }
    }

    /// Builder-style config setter
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    /// Parsed transport type, `None` if the tag is not recognized
    #[must_use]
    pub fn kind(&self) -> Option<ConnectionType> {
        ConnectionType::parse(&self.connection_type)
    }
}

/// Source of active connections per bot
#[async_trait]
pub trait ConnectionDirectory: Send + Sync + 'static {
    /// Active connections of `bot_id`, in no particular order
    async fn list_active_by_bot(&self, bot_id: &str) -> Result<Vec<Connection>>;
}

/// In-memory directory, seeded from configuration and replaceable at runtime
#[derive(Default)]
pub struct StaticConnectionDirectory {
    bots: RwLock<HashMap<String, Vec<Connection>>>,
}

impl StaticConnectionDirectory {
    /// Create a directory from a bot → connections map
    #[must_use]
    pub fn new(bots: HashMap<String, Vec<Connection>>) -> Self {
        Self {
            bots: RwLock::new(bots),
        }
    }

    /// Replace all connections of one bot
    pub fn set_connections(&self, bot_id: &str, connections: Vec<Connection>) {
        self.bots.write().insert(bot_id.to_string(), connections);
    }

    /// All connections of a bot, active or not
    #[must_use]
    pub fn all_for_bot(&self, bot_id: &str) -> Vec<Connection> {
        self.bots.read().get(bot_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionDirectory for StaticConnectionDirectory {
    async fn list_active_by_bot(&self, bot_id: &str) -> Result<Vec<Connection>> {
        Ok(self
            .bots
            .read()
            .get(bot_id)
            .map(|conns| conns.iter().filter(|c| c.active).cloned().collect())
            .unwrap_or_default())
    }
}
