//! Request DTOs for the HTTP API.

use serde::Deserialize;
use validator::Validate;

use crate::feed::NewFeed;

/// Feed registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeedRequest {
    /// Feed URL.
    #[validate(url(message = "Must be a valid URL"))]
    pub url: String,
    /// Poll interval in seconds.
    #[validate(range(min = 1, message = "Must be at least 1 second"))]
    pub refresh_interval_secs: u64,
    /// Webhook receiving new items.
    #[validate(url(message = "Must be a valid URL"))]
    pub webhook_url: String,
}

impl From<CreateFeedRequest> for NewFeed {
    fn from(req: CreateFeedRequest) -> Self {
        NewFeed::new(req.url, req.refresh_interval_secs, req.webhook_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, interval: u64, webhook: &str) -> CreateFeedRequest {
        CreateFeedRequest {
            url: url.to_string(),
            refresh_interval_secs: interval,
            webhook_url: webhook.to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        let req = request("http://x/feed.xml", 10, "https://hooks.example.com/in");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_invalid_request() {
        let errors = request("feed.xml", 0, "nope").validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("url"));
        assert!(fields.contains_key("refresh_interval_secs"));
        assert!(fields.contains_key("webhook_url"));
    }
}
