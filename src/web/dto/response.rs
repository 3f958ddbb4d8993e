//! Response DTOs for the HTTP API.

use serde::Serialize;

use crate::feed::{Feed, FeedDefinition, FeedStats};

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Feed read model without the item snapshot.
#[derive(Debug, Serialize)]
pub struct FeedSummaryResponse {
    #[serde(flatten)]
    pub definition: FeedDefinition,
    #[serde(flatten)]
    pub stats: FeedStats,
    /// Number of items in the latest snapshot.
    pub item_count: usize,
}

impl From<Feed> for FeedSummaryResponse {
    fn from(feed: Feed) -> Self {
        Self {
            item_count: feed.items.len(),
            definition: feed.definition,
            stats: feed.stats,
        }
    }
}
