//! New-item notifications for feedhook.

mod webhook;

pub use webhook::{WebhookNotifier, WebhookPayload};

use async_trait::async_trait;

use crate::feed::Item;
use crate::Result;

/// Delivers one new-item event.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `item` to `webhook_url` with a single attempt.
    ///
    /// Any transport error, timeout or non-2xx response fails with
    /// [`FeedhookError::Dispatch`](crate::FeedhookError::Dispatch). There is no
    /// retry here; a failed item is retried by the next poll.
    async fn notify(&self, webhook_url: &str, item: &Item) -> Result<()>;
}
