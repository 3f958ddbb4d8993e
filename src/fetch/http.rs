//! HTTP feed fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::parse::parse_feed;
use super::ssrf::validate_url;
use super::{FeedFetcher, FetchedFeed};
use crate::config::FetchConfig;
use crate::{FeedhookError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = concat!("feedhook/", env!("CARGO_PKG_VERSION"), " (feed watcher)");

/// Fetches feeds over HTTP and parses them with `feed-rs`.
pub struct HttpFetcher {
    client: Client,
    max_feed_size: u64,
    allow_private_hosts: bool,
}

impl HttpFetcher {
    /// Create a fetcher from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedhookError::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_feed_size {
            return Err(FeedhookError::Fetch(format!(
                "feed too large: {} bytes (max {} bytes)",
                size, self.max_feed_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        if !self.allow_private_hosts {
            validate_url(url)?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedhookError::Fetch(format!("failed to fetch feed: {e}")))?;

        if !response.status().is_success() {
            return Err(FeedhookError::Fetch(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            self.check_size(content_length)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedhookError::Fetch(format!("failed to read response: {e}")))?;
        self.check_size(bytes.len() as u64)?;

        let fetched = parse_feed(&bytes)?;
        debug!(
            "Fetched {} ({} bytes, {} items, {} skipped)",
            url,
            bytes.len(),
            fetched.items.len(),
            fetched.skipped
        );
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Local</title>
    <item>
      <title>One</title>
      <link>http://x/1</link>
      <pubDate>Wed, 01 Jan 2025 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn local_config() -> FetchConfig {
        FetchConfig {
            allow_private_hosts: true,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_local_feed() {
        let base = serve(Router::new().route("/feed.xml", get(|| async { FEED }))).await;
        let fetcher = HttpFetcher::new(&local_config()).unwrap();

        let fetched = fetcher.fetch(&format!("{base}/feed.xml")).await.unwrap();
        assert_eq!(fetched.items.len(), 1);
        assert_eq!(fetched.items[0].link, "http://x/1");
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let base = serve(Router::new().route(
            "/feed.xml",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let fetcher = HttpFetcher::new(&local_config()).unwrap();

        let err = fetcher.fetch(&format!("{base}/feed.xml")).await.unwrap_err();
        assert!(matches!(err, FeedhookError::Fetch(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let base = serve(Router::new().route("/feed.xml", get(|| async { FEED }))).await;
        let config = FetchConfig {
            max_feed_size_bytes: 16,
            ..local_config()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        let err = fetcher.fetch(&format!("{base}/feed.xml")).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_private_hosts_rejected_by_default() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();

        let err = fetcher.fetch("http://127.0.0.1:9/feed.xml").await.unwrap_err();
        assert!(err.to_string().contains("private IP"));
    }
}
