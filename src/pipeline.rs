//! Per-feed update pipeline.
//!
//! One invocation polls one feed:
//!
//! ```text
//! Idle -> Fetching -> Diffing -> Notifying -> Persisting -> Idle
//!            |
//!            +-> Aborted
//! ```
//!
//! Unseen items are marked in the seen-item store before they are dispatched,
//! and unmarked again when the dispatch fails so the next poll retries them.
//! Invocations for the same feed id are serialized; different feeds run
//! independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::feed::{FeedStats, Item};
use crate::fetch::FeedFetcher;
use crate::notify::Notifier;
use crate::registry::{FeedRegistry, StatsMutator};
use crate::seen::SeenItemStore;
use crate::{FeedhookError, Result};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStage {
    Idle,
    Fetching,
    Diffing,
    Notifying,
    Persisting,
    Aborted,
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollStage::Idle => "idle",
            PollStage::Fetching => "fetching",
            PollStage::Diffing => "diffing",
            PollStage::Notifying => "notifying",
            PollStage::Persisting => "persisting",
            PollStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Counters of a completed poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Items returned by the fetch.
    pub fetched: usize,
    /// Entries dropped by the fetcher (no usable timestamp).
    pub skipped: usize,
    /// Items not previously seen.
    pub new_items: usize,
    /// Notifications delivered.
    pub notified: usize,
    /// Notifications that failed.
    pub failed: usize,
    /// Seen records evicted at the start of the poll.
    pub evicted: u64,
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PollReport),
    /// The poll stopped without mutating anything past `stage`.
    Aborted {
        stage: PollStage,
        reason: String,
    },
}

impl PollOutcome {
    /// The report of a completed poll.
    pub fn report(&self) -> Option<&PollReport> {
        match self {
            PollOutcome::Completed(report) => Some(report),
            PollOutcome::Aborted { .. } => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, PollOutcome::Aborted { .. })
    }
}

/// Something that can poll a feed by id.
///
/// The scheduler only depends on this, so timer behaviour can be tested
/// without a real pipeline.
#[async_trait]
pub trait PollRunner: Send + Sync {
    /// Poll the feed once.
    ///
    /// Storage failures are returned as errors; everything else is reported
    /// through the outcome.
    async fn run(&self, feed_id: &str) -> Result<PollOutcome>;
}

/// The update pipeline.
pub struct UpdatePipeline {
    registry: Arc<dyn FeedRegistry>,
    store: Arc<dyn SeenItemStore>,
    fetcher: Arc<dyn FeedFetcher>,
    notifier: Arc<dyn Notifier>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UpdatePipeline {
    pub fn new(
        registry: Arc<dyn FeedRegistry>,
        store: Arc<dyn SeenItemStore>,
        fetcher: Arc<dyn FeedFetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            notifier,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Drop the single-flight lock of a feed that is no longer watched.
    ///
    /// The lock stays while a run or a [`hold`](Self::hold) still uses it, so
    /// a later registration of the same id queues behind that run.
    pub async fn forget(&self, feed_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(feed_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(feed_id);
        }
    }

    /// Wait until no poll of the feed is running and keep new ones out until
    /// the guard is dropped.
    pub async fn hold(&self, feed_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(feed_id).await.lock_owned().await
    }

    async fn lock_for(&self, feed_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(feed_id.to_string())
            .or_default()
            .clone()
    }

    /// Poll one feed.
    pub async fn poll(&self, feed_id: &str) -> Result<PollOutcome> {
        let lock = self.lock_for(feed_id).await;
        let _guard = lock.lock().await;

        // Idle -> Fetching
        let feed = match self.registry.get(feed_id).await {
            Ok(feed) => feed,
            Err(FeedhookError::NotFound(_)) => {
                debug!("Feed {} no longer registered, skipping poll", feed_id);
                return Ok(aborted(PollStage::Idle, "feed not registered"));
            }
            Err(e) => return Err(e),
        };
        let definition = feed.definition;

        debug!("Polling feed {} ({})", feed_id, definition.url);
        let fetched = match self.fetcher.fetch(&definition.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Failed to fetch feed {} ({}): {}", feed_id, definition.url, e);
                return Ok(aborted(PollStage::Fetching, e.to_string()));
            }
        };

        // Fetching -> Diffing
        let mut report = PollReport {
            fetched: fetched.items.len(),
            skipped: fetched.skipped,
            ..PollReport::default()
        };
        report.evicted = self.store.evict_stale(feed_id).await?;

        let items = fetched.items;
        if !self.registry.replace_snapshot(feed_id, items.clone()).await? {
            return self.removed_during_poll(feed_id, PollStage::Diffing).await;
        }

        // Diffing -> Notifying
        let mut storage_error = None;
        for item in &items {
            if let Err(e) = self
                .dispatch(feed_id, &definition.webhook_url, item, &mut report)
                .await
            {
                error!("Storage failure while notifying feed {}: {}", feed_id, e);
                storage_error = Some(e);
                break;
            }
        }

        // Notifying -> Persisting
        // Deliveries made before a storage failure are still counted.
        let persisted = self.persist(feed_id, &report).await;
        if let Some(e) = storage_error {
            if let Err(persist_error) = persisted {
                warn!(
                    "Could not record partial poll of feed {}: {}",
                    feed_id, persist_error
                );
            }
            return Err(e);
        }
        if !persisted? {
            return self
                .removed_during_poll(feed_id, PollStage::Persisting)
                .await;
        }

        debug!(
            "Poll of feed {} done: fetched={} new={} notified={} failed={} evicted={}",
            feed_id, report.fetched, report.new_items, report.notified, report.failed, report.evicted
        );
        Ok(PollOutcome::Completed(report))
    }

    /// Notify one item if it was not seen before.
    ///
    /// Only storage failures are returned; a failed delivery is counted in
    /// the report and rolled back in the store.
    async fn dispatch(
        &self,
        feed_id: &str,
        webhook_url: &str,
        item: &Item,
        report: &mut PollReport,
    ) -> Result<()> {
        // Marking first keeps an overlapping poll from notifying twice.
        if !self.store.mark(feed_id, item.identity()).await? {
            return Ok(());
        }
        report.new_items += 1;
        info!("New item in feed {}: {}", feed_id, item.link);

        match self.notifier.notify(webhook_url, item).await {
            Ok(()) => report.notified += 1,
            Err(e) => {
                report.failed += 1;
                warn!("Failed to notify {} for feed {}: {}", item.link, feed_id, e);
                if !self.store.unmark(feed_id, item.identity()).await? {
                    warn!(
                        "Item {} of feed {} stays marked and will not be retried",
                        item.link, feed_id
                    );
                }
            }
        }
        Ok(())
    }

    /// Commit the poll's statistics. Returns `false` if the feed is gone.
    ///
    /// The statistics are written even when the store fails to flush; the
    /// flush error is returned afterwards.
    async fn persist(&self, feed_id: &str, report: &PollReport) -> Result<bool> {
        let flushed = self.store.flush(feed_id).await;
        let cached = match self.store.size(feed_id).await {
            Ok(size) => Some(size),
            Err(e) => {
                warn!("Could not count seen items of feed {}: {}", feed_id, e);
                None
            }
        };

        let fetched_count = report.fetched as u64;
        let notified_count = report.notified as u64;
        let now = Utc::now();
        let record: StatsMutator = Box::new(move |stats: &mut FeedStats| {
            let cached = cached.unwrap_or(stats.items_cached);
            stats.record_poll(now, fetched_count, notified_count, cached)
        });
        let updated = self.registry.update_stats(feed_id, record).await?;
        flushed?;
        Ok(updated)
    }

    /// Clean up after a feed that was unwatched while its poll was running.
    async fn removed_during_poll(&self, feed_id: &str, stage: PollStage) -> Result<PollOutcome> {
        info!("Feed {} was removed during its poll ({})", feed_id, stage);
        self.store.purge(feed_id).await?;
        Ok(aborted(stage, "feed removed during poll"))
    }
}

fn aborted(stage: PollStage, reason: impl Into<String>) -> PollOutcome {
    PollOutcome::Aborted {
        stage,
        reason: reason.into(),
    }
}

#[async_trait]
impl PollRunner for UpdatePipeline {
    async fn run(&self, feed_id: &str) -> Result<PollOutcome> {
        self.poll(feed_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedDefinition, Item, NewFeed};
    use crate::fetch::FetchedFeed;
    use crate::registry::MemoryRegistry;
    use crate::seen::{ApproximateStore, MemoryBlobStore, MemoryTtlStore};
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Fetcher returning a fixed item list, swappable between polls.
    #[derive(Default)]
    struct StaticFetcher {
        result: StdMutex<Option<FetchedFeed>>,
    }

    impl StaticFetcher {
        fn set(&self, links: &[&str]) {
            let items = links.iter().map(|l| item(l)).collect();
            *self.result.lock().unwrap() = Some(FetchedFeed::new(items));
        }

        fn fail(&self) {
            *self.result.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl FeedFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedFeed> {
            self.result
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| FeedhookError::Fetch("connection refused".to_string()))
        }
    }

    /// Notifier recording deliveries and failing for selected links.
    #[derive(Default)]
    struct RecordingNotifier {
        delivered: StdMutex<Vec<String>>,
        attempts: StdMutex<Vec<String>>,
        failing: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _webhook_url: &str, item: &Item) -> Result<()> {
            self.attempts.lock().unwrap().push(item.link.clone());
            if self.failing.lock().unwrap().contains(&item.link) {
                return Err(FeedhookError::Dispatch("HTTP 500".to_string()));
            }
            self.delivered.lock().unwrap().push(item.link.clone());
            Ok(())
        }
    }

    fn item(link: &str) -> Item {
        Item {
            title: link.to_string(),
            link: link.to_string(),
            published: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            summary: String::new(),
        }
    }

    struct Harness {
        registry: Arc<MemoryRegistry>,
        store: Arc<dyn SeenItemStore>,
        fetcher: Arc<StaticFetcher>,
        notifier: Arc<RecordingNotifier>,
        pipeline: UpdatePipeline,
        feed: FeedDefinition,
    }

    async fn harness_with(store: Arc<dyn SeenItemStore>) -> Harness {
        let registry = Arc::new(MemoryRegistry::new());
        let fetcher = Arc::new(StaticFetcher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = UpdatePipeline::new(
            registry.clone(),
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
        );
        let feed = NewFeed::new("http://x/feed.xml", 10, "https://hooks.example.com/in")
            .into_definition()
            .unwrap();
        registry.register(feed.clone()).await.unwrap();

        Harness {
            registry,
            store,
            fetcher,
            notifier,
            pipeline,
            feed,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(MemoryTtlStore::default())).await
    }

    #[tokio::test]
    async fn test_first_poll_notifies_everything() {
        let h = harness().await;
        h.fetcher.set(&["L1", "L2"]);

        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.new_items, 2);
        assert_eq!(report.notified, 2);

        let feed = h.registry.get(&h.feed.id).await.unwrap();
        assert_eq!(feed.stats.notifications_sent, 2);
        assert_eq!(feed.stats.items_cached, 2);
        assert_eq!(*h.notifier.delivered.lock().unwrap(), vec!["L1", "L2"]);
    }

    #[tokio::test]
    async fn test_second_poll_notifies_only_new_items() {
        let h = harness().await;
        h.fetcher.set(&["L1", "L2"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        h.fetcher.set(&["L1", "L3"]);
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert_eq!(outcome.report().unwrap().notified, 1);

        let feed = h.registry.get(&h.feed.id).await.unwrap();
        assert_eq!(feed.stats.notifications_sent, 3);
        let links: Vec<&str> = feed.items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["L1", "L3"]);
        assert_eq!(*h.notifier.delivered.lock().unwrap(), vec!["L1", "L2", "L3"]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_rolled_back_and_retried() {
        let h = harness().await;
        h.fetcher.set(&["L1", "L2"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        h.notifier.failing.lock().unwrap().insert("L3".to_string());
        h.fetcher.set(&["L1", "L3"]);
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert_eq!(outcome.report().unwrap().failed, 1);

        let feed = h.registry.get(&h.feed.id).await.unwrap();
        assert_eq!(feed.stats.notifications_sent, 2);
        assert_eq!(feed.stats.items_cached, 2);
        assert!(!h.store.contains(&h.feed.id, "L3").await.unwrap());

        h.notifier.failing.lock().unwrap().clear();
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert_eq!(outcome.report().unwrap().notified, 1);
        assert_eq!(
            h.registry.get(&h.feed.id).await.unwrap().stats.notifications_sent,
            3
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_items() {
        let h = harness().await;
        h.notifier.failing.lock().unwrap().insert("L1".to_string());
        h.fetcher.set(&["L1", "L2", "L3"]);

        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.notified, 2);
        assert_eq!(*h.notifier.attempts.lock().unwrap(), vec!["L1", "L2", "L3"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_mutation() {
        let h = harness().await;
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();
        let before = h.registry.get(&h.feed.id).await.unwrap();

        h.fetcher.fail();
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Aborted {
                stage: PollStage::Fetching,
                ..
            }
        ));
        assert_eq!(h.registry.get(&h.feed.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_feed_aborts() {
        let h = harness().await;
        let outcome = h.pipeline.poll("000000000000").await.unwrap();
        assert!(outcome.is_aborted());
        assert!(h.notifier.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cumulative_fetched_total() {
        let h = harness().await;
        for poll in 0..4 {
            let links: Vec<String> = (0..3).map(|i| format!("P{poll}-{i}")).collect();
            let refs: Vec<&str> = links.iter().map(String::as_str).collect();
            h.fetcher.set(&refs);
            h.pipeline.poll(&h.feed.id).await.unwrap();
        }

        let stats = h.registry.get(&h.feed.id).await.unwrap().stats;
        assert_eq!(stats.items_fetched_total, 12);
        assert_eq!(stats.notifications_sent, 12);
    }

    #[tokio::test]
    async fn test_time_first_fetch_set_once() {
        let h = harness().await;
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();
        let first = h.registry.get(&h.feed.id).await.unwrap().stats;

        h.pipeline.poll(&h.feed.id).await.unwrap();
        let second = h.registry.get(&h.feed.id).await.unwrap().stats;

        assert!(first.time_first_fetch.is_some());
        assert_eq!(first.time_first_fetch, second.time_first_fetch);
        assert!(second.time_last_fetch >= first.time_last_fetch);
    }

    #[tokio::test]
    async fn test_dropped_item_is_not_renotified_before_eviction() {
        let h = harness().await;
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        h.fetcher.set(&[]);
        h.pipeline.poll(&h.feed.id).await.unwrap();
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        assert_eq!(h.notifier.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_item_renotified_after_eviction() {
        let h = harness_with(Arc::new(MemoryTtlStore::new(1))).await;
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        h.fetcher.set(&[]);
        h.pipeline.poll(&h.feed.id).await.unwrap();
        h.fetcher.set(&["L1"]);
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();

        assert_eq!(outcome.report().unwrap().evicted, 1);
        assert_eq!(h.notifier.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_approximate_store_cannot_retry() {
        let store = Arc::new(ApproximateStore::new(
            Arc::new(MemoryBlobStore::new()),
            100,
            0.001,
        ));
        let h = harness_with(store).await;
        h.notifier.failing.lock().unwrap().insert("L1".to_string());
        h.fetcher.set(&["L1"]);
        h.pipeline.poll(&h.feed.id).await.unwrap();

        h.notifier.failing.lock().unwrap().clear();
        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert_eq!(outcome.report().unwrap().new_items, 0);
        assert!(h.notifier.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_feed_is_not_resurrected() {
        let h = harness().await;
        h.fetcher.set(&["L1"]);
        h.registry.remove(&h.feed.id).await.unwrap();

        let outcome = h.pipeline.poll(&h.feed.id).await.unwrap();
        assert!(outcome.is_aborted());
        assert!(h.registry.get(&h.feed.id).await.is_err());
        assert_eq!(h.store.size(&h.feed.id).await.unwrap(), 0);
    }

    /// Exact store whose writes fail for selected identities.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryTtlStore,
        broken_marks: StdMutex<HashSet<String>>,
        broken_unmarks: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl SeenItemStore for FlakyStore {
        async fn contains(&self, feed_id: &str, identity: &str) -> Result<bool> {
            self.inner.contains(feed_id, identity).await
        }

        async fn mark(&self, feed_id: &str, identity: &str) -> Result<bool> {
            if self.broken_marks.lock().unwrap().contains(identity) {
                return Err(FeedhookError::Registry("disk I/O error".to_string()));
            }
            self.inner.mark(feed_id, identity).await
        }

        async fn unmark(&self, feed_id: &str, identity: &str) -> Result<bool> {
            if self.broken_unmarks.lock().unwrap().contains(identity) {
                return Err(FeedhookError::Registry("disk I/O error".to_string()));
            }
            self.inner.unmark(feed_id, identity).await
        }

        async fn evict_stale(&self, feed_id: &str) -> Result<u64> {
            self.inner.evict_stale(feed_id).await
        }

        async fn size(&self, feed_id: &str) -> Result<u64> {
            self.inner.size(feed_id).await
        }

        async fn purge(&self, feed_id: &str) -> Result<()> {
            self.inner.purge(feed_id).await
        }

        fn supports_rollback(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_earlier_deliveries() {
        let store = Arc::new(FlakyStore::default());
        store.broken_marks.lock().unwrap().insert("L3".to_string());
        let h = harness_with(store).await;
        h.fetcher.set(&["L1", "L2", "L3", "L4"]);

        let result = h.pipeline.poll(&h.feed.id).await;
        assert!(matches!(result, Err(FeedhookError::Registry(_))));
        assert_eq!(*h.notifier.delivered.lock().unwrap(), vec!["L1", "L2"]);

        let stats = h.registry.get(&h.feed.id).await.unwrap().stats;
        assert_eq!(stats.notifications_sent, 2);
        assert_eq!(stats.items_cached, 2);
        assert!(stats.time_last_fetch.is_some());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let store = Arc::new(FlakyStore::default());
        store.broken_unmarks.lock().unwrap().insert("L1".to_string());
        let h = harness_with(store).await;
        h.notifier.failing.lock().unwrap().insert("L1".to_string());
        h.fetcher.set(&["L1", "L2"]);

        let result = h.pipeline.poll(&h.feed.id).await;
        assert!(matches!(result, Err(FeedhookError::Registry(_))));
        assert!(h.notifier.delivered.lock().unwrap().is_empty());

        let stats = h.registry.get(&h.feed.id).await.unwrap().stats;
        assert_eq!(stats.notifications_sent, 0);
        assert_eq!(stats.items_fetched_total, 2);
    }

    #[tokio::test]
    async fn test_forget_keeps_lock_of_running_poll() {
        let h = harness().await;
        let guard = h.pipeline.hold(&h.feed.id).await;

        h.pipeline.forget(&h.feed.id).await;
        assert!(h.pipeline.locks.lock().await.contains_key(&h.feed.id));

        drop(guard);
        h.pipeline.forget(&h.feed.id).await;
        assert!(!h.pipeline.locks.lock().await.contains_key(&h.feed.id));
    }
}
