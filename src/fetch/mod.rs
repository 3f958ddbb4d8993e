//! Feed retrieval for feedhook.
//!
//! [`FeedFetcher`] turns a feed URL into the ordered items of its current
//! content. [`HttpFetcher`] is the production implementation; tests plug in
//! their own.

mod http;
mod parse;
mod ssrf;

pub use http::HttpFetcher;
pub use parse::{parse_feed, strip_html};
pub use ssrf::validate_url;

use async_trait::async_trait;

use crate::feed::Item;
use crate::Result;

/// Result of one successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedFeed {
    /// Items in feed order.
    pub items: Vec<Item>,
    /// Entries dropped because they had no usable timestamp.
    pub skipped: usize,
}

impl FetchedFeed {
    /// A fetch result with no skipped entries.
    pub fn new(items: Vec<Item>) -> Self {
        Self { items, skipped: 0 }
    }
}

/// Retrieves and normalizes a feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the feed at `url`.
    ///
    /// An empty feed is a valid result. Network errors, timeouts, non-2xx
    /// responses and unparseable documents fail with
    /// [`FeedhookError::Fetch`](crate::FeedhookError::Fetch).
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}
