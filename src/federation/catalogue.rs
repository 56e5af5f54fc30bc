//! Catalogue builder: merges every backend of a bot into one collision-free list

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::naming::{alias_name, alias_prefix, resolve_collision, tagged_description};
use super::route::{SourceKind, ToolRoute, within};
use crate::backend::ToolBackend;
use crate::connection::{Connection, ConnectionDirectory};
use crate::protocol::ToolDescriptor;

/// Built catalogue: ordered tools plus the alias → route table
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    /// Tools in insertion order, named by their public alias
    pub tools: Vec<ToolDescriptor>,
    /// Public alias → route, one entry per tool
    pub routes: HashMap<String, ToolRoute>,
}

impl Catalogue {
    /// Register a tool under a collision-free version of its current name.
    ///
    /// Returns the public name that was assigned.
    pub fn register(&mut self, mut tool: ToolDescriptor, route: ToolRoute) -> String {
        let name = resolve_collision(&tool.name, |candidate| self.routes.contains_key(candidate));
        tool.name.clone_from(&name);
        self.routes.insert(name.clone(), route);
        self.tools.push(tool);
        name
    }

    /// Number of tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Builds the catalogue of one bot from all of its reachable backends
pub struct CatalogueBuilder<'a> {
    backend: &'a dyn ToolBackend,
    directory: Option<&'a dyn ConnectionDirectory>,
    timeout: Option<Duration>,
}

impl<'a> CatalogueBuilder<'a> {
    /// Create a builder over a backend and an optional connection directory
    pub fn new(backend: &'a dyn ToolBackend, directory: Option<&'a dyn ConnectionDirectory>) -> Self {
        Self {
            backend,
            directory,
            timeout: None,
        }
    }

    /// Bound every upstream call by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the catalogue for `bot_id`.
    ///
    /// Never fails: a source that errors is logged and contributes nothing.
    pub async fn build(&self, bot_id: &str) -> Catalogue {
        let started = Instant::now();
        let mut catalogue = Catalogue::default();

        self.add_filesystem_tools(bot_id, &mut catalogue).await;

        let mut connections = self.active_connections(bot_id).await;
        connections.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        for connection in connections {
            self.add_connection_tools(bot_id, connection, &mut catalogue)
                .await;
        }

        info!(
            bot_id = %bot_id,
            tools = catalogue.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Tool catalogue built"
        );
        catalogue
    }

    async fn add_filesystem_tools(&self, bot_id: &str, catalogue: &mut Catalogue) {
        let listed = within(
            self.timeout,
            "list fs tools",
            SourceKind::Fs.list_tools(self.backend, bot_id, None),
        )
        .await;

        match listed {
            Ok(tools) => {
                debug!(bot_id = %bot_id, count = tools.len(), "Filesystem tools listed");
                for tool in tools {
                    let route = ToolRoute::filesystem(tool.name.clone());
                    catalogue.register(tool, route);
                }
            }
            Err(e) => {
                warn!(bot_id = %bot_id, error = %e, "Failed to list filesystem tools");
            }
        }
    }

    async fn active_connections(&self, bot_id: &str) -> Vec<Connection> {
        let Some(directory) = self.directory else {
            return Vec::new();
        };

        match within(
            self.timeout,
            "list connections",
            directory.list_active_by_bot(bot_id),
        )
        .await
        {
            Ok(connections) => connections,
            Err(e) => {
                warn!(bot_id = %bot_id, error = %e, "Failed to list connections, skipping connection tools");
                Vec::new()
            }
        }
    }

    async fn add_connection_tools(&self, bot_id: &str, connection: Connection, catalogue: &mut Catalogue) {
        let Some(kind) = connection.kind() else {
            warn!(
                bot_id = %bot_id,
                connection = %connection.id,
                connection_type = %connection.connection_type,
                "Unsupported connection type, skipping"
            );
            return;
        };

        let listed = within(
            self.timeout,
            &format!("list {kind} tools of '{}'", connection.name),
            SourceKind::from(kind).list_tools(self.backend, bot_id, Some(&connection)),
        )
        .await;

        let tools = match listed {
            Ok(tools) => tools,
            Err(e) => {
                warn!(
                    bot_id = %bot_id,
                    connection = %connection.id,
                    name = %connection.name,
                    error = %e,
                    "Failed to list connection tools"
                );
                return;
            }
        };

        debug!(bot_id = %bot_id, connection = %connection.id, count = tools.len(), "Connection tools listed");

        let prefix = alias_prefix(&connection.name);
        for mut tool in tools {
            let original_name = std::mem::take(&mut tool.name);
            tool.name = alias_name(&prefix, &original_name);
            tool.description = tagged_description(&connection.name, &tool.description, &original_name);
            let route = ToolRoute::connection(kind, original_name, connection.clone());
            catalogue.register(tool, route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "", json!({ "type": "object" }))
    }

    #[test]
    fn register_keeps_free_names() {
        let mut catalogue = Catalogue::default();
        let name = catalogue.register(tool("read_file"), ToolRoute::filesystem("read_file"));
        assert_eq!(name, "read_file");
        assert_eq!(catalogue.tools[0].name, "read_file");
        assert!(catalogue.routes.contains_key("read_file"));
    }

    #[test]
    fn register_renames_on_collision_and_keeps_route_original() {
        // GIVEN: a filesystem tool already named "a.b"
        let mut catalogue = Catalogue::default();
        catalogue.register(tool("a.b"), ToolRoute::filesystem("a.b"));

        // WHEN: a second tool proposes the same public name
        let conn = crate::connection::Connection::new("c1", "A", "http");
        let route = ToolRoute::connection(crate::connection::ConnectionType::Http, "b", conn);
        let name = catalogue.register(tool("a.b"), route);

        // THEN: it is renamed but routes to the original name
        assert_eq!(name, "a_b_2");
        assert_eq!(catalogue.routes["a_b_2"].original_name, "b");
        assert_eq!(catalogue.len(), 2);
        assert_eq!(catalogue.routes.len(), 2);
    }
}
