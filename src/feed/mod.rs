//! Feed data model for feedhook.
//!
//! Definitions are created on registration and never change afterwards;
//! statistics and the latest snapshot are owned by the update pipeline.

pub mod types;

pub use types::{feed_id_for_url, Feed, FeedDefinition, FeedStats, Item, NewFeed, FEED_ID_LEN};
