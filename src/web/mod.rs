//! HTTP API for feedhook.
//!
//! A thin JSON layer over [`FeedService`](crate::service::FeedService) for
//! registering, inspecting and removing watched feeds.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
