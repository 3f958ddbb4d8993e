//! Exact seen-item store with cycle-based expiry, kept in memory.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::SeenItemStore;
use crate::Result;

/// Default number of poll cycles an unobserved identity is kept.
pub const DEFAULT_TTL_CYCLES: u32 = 3;

/// Exact seen-item store.
///
/// Each identity carries an age counted in poll cycles. [`evict_stale`]
/// increments every age of the feed and drops identities older than
/// `ttl_cycles`; [`mark`] resets the age of an identity seen again.
///
/// [`evict_stale`]: SeenItemStore::evict_stale
/// [`mark`]: SeenItemStore::mark
#[derive(Debug)]
pub struct MemoryTtlStore {
    ttl_cycles: u32,
    feeds: Mutex<HashMap<String, HashMap<String, u32>>>,
}

impl MemoryTtlStore {
    /// Create a store evicting identities after `ttl_cycles` unobserved polls.
    pub fn new(ttl_cycles: u32) -> Self {
        Self {
            ttl_cycles,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Eviction threshold in poll cycles.
    pub fn ttl_cycles(&self) -> u32 {
        self.ttl_cycles
    }
}

impl Default for MemoryTtlStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_CYCLES)
    }
}

#[async_trait]
impl SeenItemStore for MemoryTtlStore {
    async fn contains(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let feeds = self.feeds.lock().await;
        Ok(feeds
            .get(feed_id)
            .is_some_and(|seen| seen.contains_key(identity)))
    }

    async fn mark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let mut feeds = self.feeds.lock().await;
        let seen = feeds.entry(feed_id.to_string()).or_default();
        match seen.get_mut(identity) {
            Some(age) => {
                *age = 0;
                Ok(false)
            }
            None => {
                seen.insert(identity.to_string(), 0);
                Ok(true)
            }
        }
    }

    async fn unmark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let mut feeds = self.feeds.lock().await;
        Ok(feeds
            .get_mut(feed_id)
            .is_some_and(|seen| seen.remove(identity).is_some()))
    }

    async fn evict_stale(&self, feed_id: &str) -> Result<u64> {
        let mut feeds = self.feeds.lock().await;
        let Some(seen) = feeds.get_mut(feed_id) else {
            return Ok(0);
        };

        let before = seen.len();
        seen.retain(|_, age| {
            *age += 1;
            *age <= self.ttl_cycles
        });
        let evicted = (before - seen.len()) as u64;
        if evicted > 0 {
            debug!("Evicted {} stale identities for feed {}", evicted, feed_id);
        }
        Ok(evicted)
    }

    async fn size(&self, feed_id: &str) -> Result<u64> {
        let feeds = self.feeds.lock().await;
        Ok(feeds.get(feed_id).map_or(0, |seen| seen.len() as u64))
    }

    async fn purge(&self, feed_id: &str) -> Result<()> {
        self.feeds.lock().await.remove(feed_id);
        Ok(())
    }

    fn supports_rollback(&self) -> bool {
        true
    }
}
