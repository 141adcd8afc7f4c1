//! Pipeline error model.
//!
//! A node returns an error only for infrastructure failures that should
//! escape the workflow; expected domain failures go into the context's error
//! list instead. The variants keep the underlying classification, so the task
//! adapter can decide between re-enqueueing with backoff and failing the run
//! outright.

use thiserror::Error;

use jobforge_providers::ProviderError;
use jobforge_store::StoreError;

/// Result type for node and workflow execution.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Infrastructure failure escaping a node.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Whether re-enqueueing the owning task can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Provider(e) => e.is_retryable(),
            PipelineError::Store(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_the_source() {
        let timeout: PipelineError = ProviderError::timeout("deadline").into();
        assert!(timeout.is_retryable());

        let rejected: PipelineError = ProviderError::upstream(422, "bad prompt").into();
        assert!(!rejected.is_retryable());

        let storage: PipelineError = StoreError::storage("pool closed").into();
        assert!(storage.is_retryable());

        let missing: PipelineError = StoreError::not_found("run").into();
        assert!(!missing.is_retryable());
    }
}
