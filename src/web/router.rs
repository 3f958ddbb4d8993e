//! Router configuration for the HTTP API.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{create_feed, delete_feed, get_feed, list_feeds, AppState};

/// Create the feed API router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/feeds", post(create_feed).get(list_feeds))
        .route("/feeds/:id", get(get_feed).delete(delete_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
