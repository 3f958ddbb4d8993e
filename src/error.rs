//! Error types for feedhook.

use thiserror::Error;

/// Common error type for feedhook.
#[derive(Error, Debug)]
pub enum FeedhookError {
    /// A feed with the same derived id is already registered.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Feed could not be retrieved or parsed.
    ///
    /// Transient: the poll is skipped and retried at the next interval.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Webhook delivery failed.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Storage backend failure.
    ///
    /// Registry and seen-item store errors from any backend end up here.
    /// Database errors from sqlx are automatically converted.
    #[error("registry error: {0}")]
    Registry(String),

    /// Validation error for registration input.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedhookError {
    /// Whether the error comes from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, FeedhookError::Registry(_))
    }
}

impl From<sqlx::Error> for FeedhookError {
    fn from(e: sqlx::Error) -> Self {
        FeedhookError::Registry(e.to_string())
    }
}

/// Result type alias for feedhook operations.
pub type Result<T> = std::result::Result<T, FeedhookError>;
