//! Per-bot route cache with a fixed time-to-live
//!
//! Entries are replaced wholesale and never mutated in place. The map lock is
//! held only for the map operation itself; callers build catalogues outside
//! of it. Staleness is checked lazily on access.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::catalogue::Catalogue;
use super::route::ToolRoute;
use crate::protocol::ToolDescriptor;

/// How long a built catalogue is served before the next access rebuilds it
pub const CATALOGUE_TTL: Duration = Duration::from_secs(5);

/// One bot's cached catalogue
struct CacheEntry {
    expires_at: Instant,
    catalogue: Catalogue,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Cache counters, updated atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

/// Thread-safe catalogue cache keyed by bot id
pub struct RouteCache {
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    stats: CacheStats,
}

impl RouteCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Fresh entry for `bot_id`, evicting it if it has expired
    fn fresh(&self, bot_id: &str) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = match entries.get(bot_id).map(|entry| entry.is_expired(now)) {
            Some(true) => {
                entries.remove(bot_id);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(false) => entries.get(bot_id).map(Arc::clone),
            None => None,
        };
        drop(entries);

        if entry.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// Copy of the cached tool list, if a fresh entry exists
    pub fn tools(&self, bot_id: &str) -> Option<Vec<ToolDescriptor>> {
        self.fresh(bot_id).map(|entry| entry.catalogue.tools.clone())
    }

    /// Route for a public alias, if a fresh entry exists and knows the name
    pub fn route(&self, bot_id: &str, name: &str) -> Option<ToolRoute> {
        self.fresh(bot_id)
            .and_then(|entry| entry.catalogue.routes.get(name).cloned())
    }

    /// Store a freshly built catalogue and return a copy of its tools
    pub fn store(&self, bot_id: &str, catalogue: Catalogue) -> Vec<ToolDescriptor> {
        let tools = catalogue.tools.clone();
        let entry = Arc::new(CacheEntry {
            expires_at: Instant::now() + CATALOGUE_TTL,
            catalogue,
        });
        self.entries.lock().insert(bot_id.to_string(), entry);
        self.stats.stores.fetch_add(1, Ordering::Relaxed);
        tools
    }

    /// Drop the entry of one bot. Returns `true` if there was one.
    pub fn invalidate(&self, bot_id: &str) -> bool {
        self.entries.lock().remove(bot_id).is_some()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            builds: self.stats.stores.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            bots: self.entries.lock().len(),
        }
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from a fresh entry
    pub hits: u64,
    /// Lookups that found no fresh entry
    pub misses: u64,
    /// Catalogues stored
    pub builds: u64,
    /// Expired entries dropped on access
    pub evictions: u64,
    /// Bots currently cached
    pub bots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalogue(names: &[&str]) -> Catalogue {
        let mut catalogue = Catalogue::default();
        for name in names {
            catalogue.register(
                ToolDescriptor::new(*name, "", json!({ "type": "object" })),
                ToolRoute::filesystem(*name),
            );
        }
        catalogue
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_served_until_ttl_elapses() {
        let cache = RouteCache::new();
        cache.store("bot-1", catalogue(&["read_file"]));

        tokio::time::advance(Duration::from_millis(4_900)).await;
        assert_eq!(cache.tools("bot-1").unwrap().len(), 1);
        assert!(cache.route("bot-1", "read_file").is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(cache.tools("bot-1").is_none());
        assert!(cache.route("bot-1", "read_file").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn tools_are_copies() {
        // GIVEN: a cached catalogue
        let cache = RouteCache::new();
        cache.store("bot-1", catalogue(&["read_file"]));

        // WHEN: the caller mutates what it got back
        let mut tools = cache.tools("bot-1").unwrap();
        tools[0].name = "hijacked".to_string();
        tools[0].description = "changed".to_string();

        // THEN: the cache is unaffected
        let again = cache.tools("bot-1").unwrap();
        assert_eq!(again[0].name, "read_file");
        assert!(again[0].description.is_empty());
    }

    #[tokio::test]
    async fn bots_are_isolated() {
        let cache = RouteCache::new();
        cache.store("bot-1", catalogue(&["a"]));
        assert!(cache.route("bot-2", "a").is_none());
        assert!(cache.route("bot-1", "b").is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache = RouteCache::new();
        cache.store("bot-1", catalogue(&["a"]));
        assert!(cache.invalidate("bot-1"));
        assert!(!cache.invalidate("bot-1"));
        assert!(cache.tools("bot-1").is_none());
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = RouteCache::new();
        assert!(cache.tools("bot-1").is_none());
        cache.store("bot-1", catalogue(&["a"]));
        cache.tools("bot-1");
        cache.route("bot-1", "a");

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.bots, 1);
    }
}
