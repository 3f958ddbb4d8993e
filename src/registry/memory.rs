//! In-memory feed registry.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FeedRegistry, StatsMutator};
use crate::feed::{Feed, FeedDefinition, Item};
use crate::{FeedhookError, Result};

/// Feed registry kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    feeds: RwLock<HashMap<String, Feed>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedRegistry for MemoryRegistry {
    async fn register(&self, definition: FeedDefinition) -> Result<Feed> {
        let mut feeds = self.feeds.write().await;
        if feeds.contains_key(&definition.id) {
            return Err(FeedhookError::Conflict(format!(
                "feed {} already registered",
                definition.id
            )));
        }
        let feed = Feed::new(definition);
        feeds.insert(feed.definition.id.clone(), feed.clone());
        Ok(feed)
    }

    async fn get(&self, id: &str) -> Result<Feed> {
        self.feeds
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FeedhookError::NotFound(format!("feed {id}")))
    }

    async fn list(&self) -> Result<Vec<FeedDefinition>> {
        let feeds = self.feeds.read().await;
        Ok(feeds.values().map(|f| f.definition.clone()).collect())
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self.feeds.read().await;
        Ok(feeds.values().cloned().collect())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        match self.feeds.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(FeedhookError::NotFound(format!("feed {id}"))),
        }
    }

    async fn update_stats(&self, id: &str, mutator: StatsMutator) -> Result<bool> {
        let mut feeds = self.feeds.write().await;
        match feeds.get_mut(id) {
            Some(feed) => {
                mutator(&mut feed.stats);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_snapshot(&self, id: &str, items: Vec<Item>) -> Result<bool> {
        let mut feeds = self.feeds.write().await;
        match feeds.get_mut(id) {
            Some(feed) => {
                feed.items = items;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
