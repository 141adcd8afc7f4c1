//! Store error model.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error from a store operation.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or state conflict (e.g. duplicate matched posting).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Connectivity or backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row could not be decoded into its entity.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Connectivity-class failures are worth re-enqueueing the owning task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }
}
