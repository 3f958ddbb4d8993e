//! Test helpers for integration tests.
//!
//! Provides scripted fetchers and recording notifiers so the pipeline can be
//! driven without network access.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Semaphore;

use feedhook::config::SchedulerConfig;
use feedhook::fetch::{FeedFetcher, FetchedFeed};
use feedhook::notify::Notifier;
use feedhook::registry::FeedRegistry;
use feedhook::seen::SeenItemStore;
use feedhook::{FeedService, FeedhookError, Item, MemoryRegistry, MemoryTtlStore, Result};

/// Webhook used by test feeds.
pub const WEBHOOK: &str = "https://hooks.example.com/in";

/// Build an item whose link is `link`.
pub fn item(link: &str) -> Item {
    Item {
        title: format!("Title of {link}"),
        link: link.to_string(),
        published: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        summary: format!("Summary of {link}"),
    }
}

/// Fetcher serving per-URL item lists set by the test.
///
/// A fetch of an URL with no list set fails. Fetches can be held back with
/// [`ScriptedFetcher::hold`] until [`ScriptedFetcher::release`] is called.
#[derive(Default)]
pub struct ScriptedFetcher {
    feeds: Mutex<HashMap<String, Vec<Item>>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `links` for `url` from now on.
    pub fn set(&self, url: &str, links: &[&str]) {
        let items = links.iter().map(|l| item(l)).collect();
        self.feeds.lock().unwrap().insert(url.to_string(), items);
    }

    /// Make fetches of `url` fail.
    pub fn fail(&self, url: &str) {
        self.feeds.lock().unwrap().remove(url);
    }

    /// Block fetches until released.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    /// Highest number of fetches that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            // Each released permit lets one fetch through.
            gate.acquire().await.unwrap().forget();
        }
        // Give other tasks a chance to overlap with this fetch.
        tokio::task::yield_now().await;

        let result = self
            .feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .map(FetchedFeed::new)
            .ok_or_else(|| FeedhookError::Fetch("connection refused".to_string()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Notifier recording every attempt, failing for selected links.
#[derive(Default)]
pub struct RecordingNotifier {
    attempts: Mutex<Vec<(String, Item)>>,
    delivered: Mutex<Vec<(String, Item)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries of `link` fail until [`RecordingNotifier::recover`].
    pub fn fail_on(&self, link: &str) {
        self.failing.lock().unwrap().insert(link.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Links delivered so far, in order.
    pub fn delivered_links(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item)| item.link.clone())
            .collect()
    }

    /// Links attempted so far, in order.
    pub fn attempted_links(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item)| item.link.clone())
            .collect()
    }

    pub fn webhooks(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(hook, _)| hook.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, webhook_url: &str, item: &Item) -> Result<()> {
        self.attempts
            .lock()
            .unwrap()
            .push((webhook_url.to_string(), item.clone()));
        if self.failing.lock().unwrap().contains(&item.link) {
            return Err(FeedhookError::Dispatch("HTTP 500".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((webhook_url.to_string(), item.clone()));
        Ok(())
    }
}

/// A service over in-memory backends with scripted collaborators.
pub struct TestContext {
    pub service: Arc<FeedService>,
    pub registry: Arc<dyn FeedRegistry>,
    pub store: Arc<dyn SeenItemStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestContext {
    /// In-memory backends, no immediate run on registration.
    pub fn new() -> Self {
        Self::with_backends(
            Arc::new(MemoryRegistry::new()),
            Arc::new(MemoryTtlStore::default()),
        )
    }

    pub fn with_backends(registry: Arc<dyn FeedRegistry>, store: Arc<dyn SeenItemStore>) -> Self {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let config = SchedulerConfig {
            run_on_register: false,
            ..SchedulerConfig::default()
        };
        let service = Arc::new(FeedService::new(
            registry.clone(),
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            config,
        ));

        Self {
            service,
            registry,
            store,
            fetcher,
            notifier,
        }
    }
}
