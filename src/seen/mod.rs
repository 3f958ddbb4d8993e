//! Seen-item stores for feedhook.
//!
//! A seen-item store remembers, per feed, which item identities have already
//! triggered a notification. The update pipeline only talks to the
//! [`SeenItemStore`] trait, so the exact and approximate strategies can be
//! swapped through configuration.
//!
//! - [`MemoryTtlStore`] / [`SqliteTtlStore`]: exact set, entries aged once per
//!   poll and evicted after a fixed number of cycles.
//! - [`ApproximateStore`]: scalable Bloom filter, persisted per feed through a
//!   [`FilterBlobStore`]. Cannot roll back a mark.

pub mod approximate;
pub mod bloom;
pub mod sqlite;
pub mod ttl;

pub use approximate::{ApproximateStore, FilterBlobStore, MemoryBlobStore};
pub use bloom::ScalableBloomFilter;
pub use sqlite::{SqliteBlobStore, SqliteTtlStore};
pub use ttl::MemoryTtlStore;

use async_trait::async_trait;

use crate::Result;

/// Per-feed record of already-notified item identities.
#[async_trait]
pub trait SeenItemStore: Send + Sync {
    /// Whether `identity` is recorded for the feed.
    async fn contains(&self, feed_id: &str, identity: &str) -> Result<bool>;

    /// Record `identity` if absent.
    ///
    /// Returns `true` only when the identity was not present before. An
    /// identity that is already present counts as observed again and has its
    /// eviction age reset.
    async fn mark(&self, feed_id: &str, identity: &str) -> Result<bool>;

    /// Remove `identity` so the item is retried on the next poll.
    ///
    /// Returns `false` when the record could not be removed.
    async fn unmark(&self, feed_id: &str, identity: &str) -> Result<bool>;

    /// Advance the feed by one poll cycle and drop expired records.
    ///
    /// Returns the number of evicted records.
    async fn evict_stale(&self, feed_id: &str) -> Result<u64>;

    /// Number of records held for the feed.
    async fn size(&self, feed_id: &str) -> Result<u64>;

    /// Persist pending state of the feed.
    async fn flush(&self, _feed_id: &str) -> Result<()> {
        Ok(())
    }

    /// Drop everything stored for the feed.
    async fn purge(&self, feed_id: &str) -> Result<()>;

    /// Whether [`unmark`](Self::unmark) actually removes records.
    fn supports_rollback(&self) -> bool;
}
