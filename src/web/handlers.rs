//! Feed handlers for the HTTP API.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::feed::{Feed, FeedDefinition};
use crate::service::FeedService;
use crate::web::dto::{ApiResponse, CreateFeedRequest, FeedSummaryResponse, ValidatedJson};
use crate::web::error::ApiError;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub service: Arc<FeedService>,
}

impl AppState {
    pub fn new(service: Arc<FeedService>) -> Self {
        Self { service }
    }
}

/// POST /feeds - Watch a new feed.
pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateFeedRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FeedDefinition>>), ApiError> {
    let definition = state.service.watch(req.into()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(definition))))
}

/// GET /feeds - List watched feeds.
pub async fn list_feeds(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<FeedSummaryResponse>>>, ApiError> {
    let feeds = state.service.list().await?;
    let summaries = feeds.into_iter().map(FeedSummaryResponse::from).collect();
    Ok(Json(ApiResponse::new(summaries)))
}

/// GET /feeds/:id - Feed details with the latest items.
pub async fn get_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Feed>>, ApiError> {
    let feed = state.service.get(&id).await?;
    Ok(Json(ApiResponse::new(feed)))
}

/// DELETE /feeds/:id - Stop watching a feed.
pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.unwatch(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
