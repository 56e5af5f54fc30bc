//! Federated tool gateway
//!
//! One tenant-scoped catalogue over every tool source a bot can reach, and
//! one call interface that routes an alias back to its backend.
//!
//! # Architecture
//!
//! ```text
//! list_tools(bot) ──▶ RouteCache ──(miss)──▶ CatalogueBuilder
//!                                              ├─ filesystem tools
//!                                              └─ ConnectionDirectory ─▶ http / sse / stdio
//! call_tool(bot, alias) ──▶ RouteCache.route ──▶ SourceKind dispatch ──▶ normalize
//! ```
//!
//! Concurrent rebuilds for the same bot are not collapsed: two callers
//! hitting an expired entry both query the backends and the last store wins.

mod cache;
mod catalogue;
pub mod naming;
pub mod outcome;
mod route;

pub use cache::{CATALOGUE_TTL, CacheStatsSnapshot};

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backend::ToolBackend;
use crate::connection::ConnectionDirectory;
use crate::protocol::ToolDescriptor;
use crate::{Error, Result};
use cache::RouteCache;
use catalogue::CatalogueBuilder;
use outcome::{normalize_call_result, tool_error_result};
use route::within;

/// Per-request scope of a gateway operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSessionContext {
    /// Tenant identifier
    pub bot_id: String,
    /// Deadline applied to each backend call of this request
    pub timeout: Option<Duration>,
}

impl ToolSessionContext {
    /// Context for one bot without an explicit deadline
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            timeout: None,
        }
    }

    /// Bound every backend call by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The federated tool gateway façade
pub struct FederationGateway {
    backend: Option<Arc<dyn ToolBackend>>,
    directory: Option<Arc<dyn ConnectionDirectory>>,
    cache: RouteCache,
    default_timeout: Option<Duration>,
}

impl FederationGateway {
    /// Gateway over a backend and a connection directory
    #[must_use]
    pub fn new(backend: Arc<dyn ToolBackend>, directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self {
            backend: Some(backend),
            directory: Some(directory),
            cache: RouteCache::new(),
            default_timeout: None,
        }
    }

    /// Gateway with no backend: lists nothing, answers every call with an error result
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            backend: None,
            directory: None,
            cache: RouteCache::new(),
            default_timeout: None,
        }
    }

    /// Gateway over a backend only; no connection-sourced tools
    #[must_use]
    pub fn without_directory(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::unconfigured()
        }
    }

    /// Deadline used when the session context sets none
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn timeout_for(&self, session: &ToolSessionContext) -> Option<Duration> {
        session.timeout.or(self.default_timeout)
    }

    /// Catalogue of the session's bot.
    ///
    /// A blank bot id or a missing backend yields an empty list, not an error.
    #[tracing::instrument(skip(self, session), fields(bot_id = %session.bot_id))]
    pub async fn list_tools(&self, session: &ToolSessionContext) -> Result<Vec<ToolDescriptor>> {
        let bot_id = session.bot_id.as_str();
        if bot_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(backend) = self.backend.as_deref() else {
            return Ok(Vec::new());
        };

        if let Some(tools) = self.cache.tools(bot_id) {
            debug!(count = tools.len(), "Serving tool catalogue from cache");
            return Ok(tools);
        }

        let catalogue = CatalogueBuilder::new(backend, self.directory.as_deref())
            .with_timeout(self.timeout_for(session))
            .build(bot_id)
            .await;

        Ok(self.cache.store(bot_id, catalogue))
    }

    /// Call a tool by its public alias.
    ///
    /// Backend failures come back as error-shaped results. The only error
    /// returned is [`Error::ToolNotFound`], after one catalogue refresh.
    #[tracing::instrument(
        skip(self, session, args),
        fields(
            bot_id = %session.bot_id,
            tool = %tool_name,
            request_id = %uuid::Uuid::new_v4()
        )
    )]
    pub async fn call_tool(
        &self,
        session: &ToolSessionContext,
        tool_name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<Value> {
        let bot_id = session.bot_id.as_str();
        if bot_id.trim().is_empty() {
            return Ok(tool_error_result("bot_id is required"));
        }
        let Some(backend) = self.backend.as_deref() else {
            return Ok(tool_error_result("federation gateway not available"));
        };

        let route = match self.cache.route(bot_id, tool_name) {
            Some(route) => route,
            None => {
                self.list_tools(session).await?;
                self.cache
                    .route(bot_id, tool_name)
                    .ok_or_else(|| Error::ToolNotFound(tool_name.to_string()))?
            }
        };

        debug!(
            source = %route.source,
            original = %route.original_name,
            connection = route.connection.as_ref().map_or("", |c| c.id.as_str()),
            "Dispatching tool call"
        );

        let args = Value::Object(args.unwrap_or_default());
        let outcome = within(
            self.timeout_for(session),
            &format!("call {tool_name}"),
            route.source.call_tool(
                backend,
                bot_id,
                route.connection.as_ref(),
                &route.original_name,
                args,
            ),
        )
        .await;

        if let Err(e) = &outcome {
            warn!(source = %route.source, error = %e, "Tool call failed");
        }

        Ok(normalize_call_result(outcome))
    }

    /// Forget the cached catalogue of one bot
    pub fn invalidate(&self, bot_id: &str) -> bool {
        self.cache.invalidate(bot_id)
    }

    /// Cache counters, for health reporting
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outcome::{is_error_result, result_text};

    #[tokio::test]
    async fn unconfigured_gateway_lists_nothing() {
        let gateway = FederationGateway::unconfigured();
        let tools = gateway
            .list_tools(&ToolSessionContext::new("bot-1"))
            .await
            .unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_gateway_answers_with_error_result() {
        let gateway = FederationGateway::unconfigured();
        let result = gateway
            .call_tool(&ToolSessionContext::new("bot-1"), "anything", None)
            .await
            .unwrap();
        assert!(is_error_result(&result));
        assert_eq!(result_text(&result), Some("federation gateway not available"));
    }

    #[tokio::test]
    async fn blank_bot_id_is_rejected_before_backend_checks() {
        let gateway = FederationGateway::unconfigured();
        let session = ToolSessionContext::new("   ");

        assert!(gateway.list_tools(&session).await.unwrap().is_empty());
        let result = gateway.call_tool(&session, "x", None).await.unwrap();
        assert_eq!(result_text(&result), Some("bot_id is required"));
    }

    #[test]
    fn session_timeout_overrides_default() {
        let gateway = FederationGateway::unconfigured().with_default_timeout(Some(Duration::from_secs(30)));
        let plain = ToolSessionContext::new("bot-1");
        let bounded = ToolSessionContext::new("bot-1").with_timeout(Duration::from_secs(2));
        assert_eq!(gateway.timeout_for(&plain), Some(Duration::from_secs(30)));
        assert_eq!(gateway.timeout_for(&bounded), Some(Duration::from_secs(2)));
    }
}
