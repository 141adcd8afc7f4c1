//! Provider error model with retryable/permanent classification.

use thiserror::Error;

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error from an external provider call.
///
/// The variants carry the classification the task-queue adapter needs:
/// timeouts, unavailability and 5xx responses are worth re-enqueueing with
/// backoff; 4xx responses and malformed payloads are permanent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The call exceeded its deadline.
    #[error("provider timeout: {0}")]
    Timeout(String),

    /// Could not reach the provider (connect/DNS/broker-down class).
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with an HTTP error status.
    #[error("upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The provider answered, but not in the declared shape.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether re-enqueueing the owning task can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Unavailable(_) => true,
            ProviderError::Upstream { status, .. } => *status >= 500,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_split() {
        assert!(ProviderError::timeout("deadline").is_retryable());
        assert!(ProviderError::unavailable("connect refused").is_retryable());
        assert!(ProviderError::upstream(503, "busy").is_retryable());
        assert!(!ProviderError::upstream(422, "bad prompt").is_retryable());
        assert!(!ProviderError::invalid_response("no json").is_retryable());
    }
}
