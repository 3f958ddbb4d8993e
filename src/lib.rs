//! feedhook - feed watcher with webhook notifications
//!
//! Polls RSS/Atom feeds on a per-feed schedule, detects items that were not
//! seen before and posts each of them to the feed's webhook.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod seen;
pub mod service;
pub mod web;

pub use config::Config;
pub use db::Database;
pub use error::{FeedhookError, Result};
pub use feed::{feed_id_for_url, Feed, FeedDefinition, FeedStats, Item, NewFeed};
pub use fetch::{FeedFetcher, FetchedFeed, HttpFetcher};
pub use notify::{Notifier, WebhookNotifier};
pub use pipeline::{PollOutcome, PollReport, PollRunner, PollStage, UpdatePipeline};
pub use registry::{FeedRegistry, MemoryRegistry, SqliteRegistry};
pub use scheduler::Scheduler;
pub use seen::{ApproximateStore, MemoryTtlStore, SeenItemStore, SqliteTtlStore};
pub use service::{Backends, FeedService};
pub use web::WebServer;
