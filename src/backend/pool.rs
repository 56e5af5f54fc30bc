//! Pool of MCP client sessions, keyed by connection

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use super::client::{ClientStatus, McpClient};
use super::settings::{TransportSpec, fingerprint};
use crate::Result;
use crate::connection::Connection;

struct PooledClient {
    fingerprint: String,
    client: Arc<McpClient>,
}

/// Client sessions by `scope/connection-id`.
///
/// A connection whose config changed gets a new session; the old one is
/// closed in the background.
#[derive(Default)]
pub struct ClientPool {
    clients: DashMap<String, PooledClient>,
}

impl ClientPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `connection` under `scope`, built with `spec` if absent or stale
    pub fn client(
        &self,
        scope: &str,
        connection: &Connection,
        spec: impl FnOnce() -> Result<TransportSpec>,
    ) -> Result<Arc<McpClient>> {
        let key = format!("{scope}/{}", connection.id);
        let print = fingerprint(connection);

        // The shard lock of the entry is held until the session is in place,
        // so concurrent callers with the same config share one session.
        let (client, replaced) = match self.clients.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().fingerprint == print {
                    return Ok(Arc::clone(&entry.get().client));
                }
                debug!(key = %entry.key(), "Connection config changed, replacing session");
                let client = Arc::new(McpClient::new(&connection.name, spec()?));
                let old = entry.insert(PooledClient {
                    fingerprint: print,
                    client: Arc::clone(&client),
                });
                (client, Some(old))
            }
            Entry::Vacant(entry) => {
                let client = Arc::new(McpClient::new(&connection.name, spec()?));
                entry.insert(PooledClient {
                    fingerprint: print,
                    client: Arc::clone(&client),
                });
                (client, None)
            }
        };

        if let Some(old) = replaced {
            tokio::spawn(async move {
                if let Err(e) = old.client.stop().await {
                    warn!(client = %old.client.name, error = %e, "Failed to stop replaced session");
                }
            });
        }

        Ok(client)
    }

    /// Number of pooled sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no sessions are pooled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Status of every pooled session
    #[must_use]
    pub fn statuses(&self) -> HashMap<String, ClientStatus> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.client.status()))
            .collect()
    }

    /// Stop and drop all sessions
    pub async fn stop_all(&self) {
        let clients: Vec<Arc<McpClient>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(&entry.client))
            .collect();
        self.clients.clear();

        for client in clients {
            if let Err(e) = client.stop().await {
                warn!(client = %client.name, error = %e, "Failed to stop session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Barrier;
    use std::time::Duration;

    use super::*;
    use crate::transport::HttpMode;
    use serde_json::json;

    fn spec_for(url: &str) -> TransportSpec {
        TransportSpec::Http {
            url: url.to_string(),
            headers: HashMap::new(),
            mode: HttpMode::Streamable,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn same_config_reuses_session() {
        let pool = ClientPool::new();
        let conn = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://a/mcp" }));

        let first = pool.client("http", &conn, || Ok(spec_for("http://a/mcp"))).unwrap();
        let second = pool
            .client("http", &conn, || panic!("spec must not be rebuilt"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn changed_config_replaces_session() {
        // GIVEN: a pooled session
        let pool = ClientPool::new();
        let before = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://a/mcp" }));
        let first = pool.client("http", &before, || Ok(spec_for("http://a/mcp"))).unwrap();

        // WHEN: the same connection id shows up with a new URL
        let after = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://b/mcp" }));
        let second = pool.client("http", &after, || Ok(spec_for("http://b/mcp"))).unwrap();

        // THEN: a new session replaces the old one
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
        assert_eq!(second.spec(), &spec_for("http://b/mcp"));
    }

    #[test]
    fn concurrent_callers_share_one_session() {
        // GIVEN: threads asking for the same connection at the same moment
        let conn = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://a/mcp" }));

        for _ in 0..200 {
            let pool = ClientPool::new();
            let barrier = Barrier::new(4);

            // WHEN: they all race on an empty pool
            let clients: Vec<Arc<McpClient>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            pool.client("http", &conn, || Ok(spec_for("http://a/mcp"))).unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            // THEN: every caller got the same session and nothing was replaced
            assert_eq!(pool.len(), 1);
            assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        }
    }

    #[tokio::test]
    async fn scopes_are_separate() {
        let pool = ClientPool::new();
        let conn = Connection::new("c1", "A", "stdio");
        pool.client("bot-1", &conn, || Ok(spec_for("http://a"))).unwrap();
        pool.client("bot-2", &conn, || Ok(spec_for("http://a"))).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.statuses().len(), 2);

        pool.stop_all().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn spec_error_is_returned() {
        let pool = ClientPool::new();
        let conn = Connection::new("c1", "A", "http");
        let result = pool.client("http", &conn, || Err(crate::Error::Config("no url".into())));
        assert!(result.is_err());
        assert!(pool.is_empty());
    }
}
