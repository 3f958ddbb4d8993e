//! Data Transfer Objects for the HTTP API.

pub mod request;
pub mod response;
pub mod validation;

pub use request::CreateFeedRequest;
pub use response::{ApiResponse, FeedSummaryResponse};
pub use validation::ValidatedJson;
