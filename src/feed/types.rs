//! Feed types for feedhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{FeedhookError, Result};

/// Number of hex characters in a feed id.
pub const FEED_ID_LEN: usize = 12;

/// Derive the feed id for a URL.
///
/// The id is a hex prefix of the SHA-256 digest of the URL exactly as
/// registered, so it is stable across restarts and re-registration of the
/// same URL maps to the same id.
pub fn feed_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..FEED_ID_LEN].to_string()
}

/// A watched feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDefinition {
    /// Feed id, derived from the URL.
    pub id: String,
    /// Feed URL.
    pub url: String,
    /// Poll interval in seconds (always > 0).
    pub refresh_interval_secs: u64,
    /// Webhook receiving new-item notifications.
    pub webhook_url: String,
}

/// Registration input for a new feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewFeed {
    /// Feed URL.
    pub url: String,
    /// Poll interval in seconds.
    pub refresh_interval_secs: u64,
    /// Webhook URL.
    pub webhook_url: String,
}

impl NewFeed {
    /// Create a new registration request.
    pub fn new(
        url: impl Into<String>,
        refresh_interval_secs: u64,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            refresh_interval_secs,
            webhook_url: webhook_url.into(),
        }
    }

    /// Validate the request and derive the feed definition.
    pub fn into_definition(self) -> Result<FeedDefinition> {
        if self.refresh_interval_secs == 0 {
            return Err(FeedhookError::Validation(
                "refresh_interval_secs must be greater than 0".to_string(),
            ));
        }
        check_http_url("url", &self.url)?;
        check_http_url("webhook_url", &self.webhook_url)?;

        Ok(FeedDefinition {
            id: feed_id_for_url(&self.url),
            url: self.url,
            refresh_interval_secs: self.refresh_interval_secs,
            webhook_url: self.webhook_url,
        })
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| FeedhookError::Validation(format!("{field}: invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(FeedhookError::Validation(format!(
            "{field}: unsupported URL scheme: {scheme}"
        ))),
    }
}

/// Accumulated per-feed statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    /// First successful fetch. Set once.
    pub time_first_fetch: Option<DateTime<Utc>>,
    /// Most recent successful fetch.
    pub time_last_fetch: Option<DateTime<Utc>>,
    /// Items seen across all successful polls.
    pub items_fetched_total: u64,
    /// Identities currently held by the seen-item store.
    pub items_cached: u64,
    /// Successfully delivered notifications.
    pub notifications_sent: u64,
}

impl FeedStats {
    /// Record a completed poll at `now`.
    pub fn record_poll(&mut self, now: DateTime<Utc>, fetched: u64, notified: u64, cached: u64) {
        if self.time_first_fetch.is_none() {
            self.time_first_fetch = Some(now);
        }
        self.time_last_fetch = Some(now);
        self.items_fetched_total += fetched;
        self.notifications_sent += notified;
        self.items_cached = cached;
    }
}

/// One entry of a fetched feed.
///
/// This is also the webhook payload under `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Entry title.
    pub title: String,
    /// Entry link, used as the item identity.
    pub link: String,
    /// Publication time, normalized to UTC.
    pub published: DateTime<Utc>,
    /// Plain-text summary.
    pub summary: String,
}

impl Item {
    /// Identity used for deduplication.
    pub fn identity(&self) -> &str {
        &self.link
    }
}

/// Read model of a watched feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    /// Definition.
    #[serde(flatten)]
    pub definition: FeedDefinition,
    /// Statistics.
    #[serde(flatten)]
    pub stats: FeedStats,
    /// Items of the latest successful fetch.
    pub items: Vec<Item>,
}

impl Feed {
    /// A freshly registered feed with no polls yet.
    pub fn new(definition: FeedDefinition) -> Self {
        Self {
            definition,
            stats: FeedStats::default(),
            items: Vec::new(),
        }
    }

    /// Feed id.
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}
