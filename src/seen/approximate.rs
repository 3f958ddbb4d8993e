//! Approximate seen-item store backed by scalable Bloom filters.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::bloom::ScalableBloomFilter;
use super::SeenItemStore;
use crate::Result;

/// Storage for serialized per-feed filters.
#[async_trait]
pub trait FilterBlobStore: Send + Sync {
    /// Load the blob stored for a feed.
    async fn load(&self, feed_id: &str) -> Result<Option<Vec<u8>>>;

    /// Store the blob for a feed, replacing any previous one.
    async fn save(&self, feed_id: &str, data: &[u8]) -> Result<()>;

    /// Delete the blob of a feed. Absent blobs are not an error.
    async fn delete(&self, feed_id: &str) -> Result<()>;
}

/// Blob store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FilterBlobStore for MemoryBlobStore {
    async fn load(&self, feed_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(feed_id).cloned())
    }

    async fn save(&self, feed_id: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(feed_id.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, feed_id: &str) -> Result<()> {
        self.blobs.write().await.remove(feed_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FilterCache {
    filters: HashMap<String, ScalableBloomFilter>,
    dirty: HashSet<String>,
}

/// Seen-item store using one scalable Bloom filter per feed.
///
/// Filters are loaded from the blob store on first access and written back on
/// [`flush`](SeenItemStore::flush). A false positive silently suppresses a
/// notification; false negatives never happen. Records cannot be removed, so
/// a failed dispatch is not retried and filters never expire.
pub struct ApproximateStore {
    blobs: Arc<dyn FilterBlobStore>,
    initial_capacity: usize,
    error_rate: f64,
    cache: Mutex<FilterCache>,
}

impl ApproximateStore {
    /// Create a store persisting its filters to `blobs`.
    pub fn new(blobs: Arc<dyn FilterBlobStore>, initial_capacity: usize, error_rate: f64) -> Self {
        Self {
            blobs,
            initial_capacity,
            error_rate,
            cache: Mutex::new(FilterCache::default()),
        }
    }

    /// Make sure the filter of `feed_id` is in the cache.
    async fn load_into(&self, cache: &mut FilterCache, feed_id: &str) -> Result<()> {
        if cache.filters.contains_key(feed_id) {
            return Ok(());
        }

        let filter = match self.blobs.load(feed_id).await? {
            Some(data) => {
                let filter = ScalableBloomFilter::from_bytes(&data)?;
                debug!(
                    "Loaded seen filter for feed {} ({} entries)",
                    feed_id,
                    filter.len()
                );
                filter
            }
            None => ScalableBloomFilter::new(self.initial_capacity, self.error_rate),
        };
        cache.filters.insert(feed_id.to_string(), filter);
        Ok(())
    }
}

#[async_trait]
impl SeenItemStore for ApproximateStore {
    async fn contains(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        self.load_into(&mut cache, feed_id).await?;
        Ok(cache
            .filters
            .get(feed_id)
            .is_some_and(|filter| filter.contains(identity)))
    }

    async fn mark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        self.load_into(&mut cache, feed_id).await?;

        let inserted = cache
            .filters
            .get_mut(feed_id)
            .is_some_and(|filter| filter.insert(identity));
        if inserted {
            cache.dirty.insert(feed_id.to_string());
        }
        Ok(inserted)
    }

    async fn unmark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        warn!(
            "Cannot roll back {} for feed {}: approximate store does not support removal",
            identity, feed_id
        );
        Ok(false)
    }

    async fn evict_stale(&self, _feed_id: &str) -> Result<u64> {
        Ok(0)
    }

    async fn size(&self, feed_id: &str) -> Result<u64> {
        let mut cache = self.cache.lock().await;
        self.load_into(&mut cache, feed_id).await?;
        Ok(cache
            .filters
            .get(feed_id)
            .map_or(0, |filter| filter.len() as u64))
    }

    async fn flush(&self, feed_id: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if !cache.dirty.contains(feed_id) {
            return Ok(());
        }
        if let Some(filter) = cache.filters.get(feed_id) {
            let data = filter.to_bytes()?;
            self.blobs.save(feed_id, &data).await?;
            debug!("Persisted seen filter for feed {} ({} bytes)", feed_id, data.len());
        }
        cache.dirty.remove(feed_id);
        Ok(())
    }

    async fn purge(&self, feed_id: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        cache.filters.remove(feed_id);
        cache.dirty.remove(feed_id);
        self.blobs.delete(feed_id).await
    }

    fn supports_rollback(&self) -> bool {
        false
    }
}
