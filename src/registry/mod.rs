//! Feed registry for feedhook.
//!
//! The registry owns feed definitions, their accumulated statistics and the
//! snapshot of the latest fetch. Two backends are provided: a process-local
//! map and a SQLite store.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::feed::{Feed, FeedDefinition, FeedStats, Item};
use crate::Result;

pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;

/// In-place edit applied to a feed's statistics.
pub type StatsMutator = Box<dyn FnOnce(&mut FeedStats) + Send>;

/// Durable store of watched feeds.
///
/// Implementations must be safe to share between concurrent pipeline runs.
#[async_trait]
pub trait FeedRegistry: Send + Sync {
    /// Register a new feed.
    ///
    /// Fails with `Conflict` if a feed with the same id already exists.
    async fn register(&self, definition: FeedDefinition) -> Result<Feed>;

    /// Get a feed with its statistics and latest snapshot.
    ///
    /// Fails with `NotFound` if the id is unknown.
    async fn get(&self, id: &str) -> Result<Feed>;

    /// List all feed definitions. Order is unspecified.
    async fn list(&self) -> Result<Vec<FeedDefinition>>;

    /// List all feeds with statistics and snapshots.
    async fn list_feeds(&self) -> Result<Vec<Feed>>;

    /// Delete a feed together with its statistics and snapshot.
    ///
    /// Fails with `NotFound` if the id is unknown.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Apply `mutator` to the feed's statistics.
    ///
    /// Returns `false` without error when the feed no longer exists.
    async fn update_stats(&self, id: &str, mutator: StatsMutator) -> Result<bool>;

    /// Replace the latest snapshot with `items`.
    ///
    /// Returns `false` without error when the feed no longer exists.
    async fn replace_snapshot(&self, id: &str, items: Vec<Item>) -> Result<bool>;
}
