//! Worker error types.

use thiserror::Error;

use mflow_models::ProgressRegression;
use mflow_providers::{ChainExhausted, ProviderError};
use mflow_queue::QueueError;
use mflow_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No handler registered for job type '{0}'")]
    UnknownJobType(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors raised by a [`JobContext`](crate::context::JobContext) operation.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    ProgressRegression(#[from] ProgressRegression),

    #[error("Failed to persist job state: {0}")]
    Storage(#[from] StorageError),

    /// The attempt this context belonged to has already finished.
    #[error("Job attempt is no longer running")]
    Closed,
}

/// Errors a job handler returns.
///
/// Only `Retryable` and retryable provider exhaustion lead to another attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient failure; the job is re-queued while attempts remain.
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; the job fails immediately.
    #[error("{0}")]
    Fatal(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Retryable(_) => true,
            HandlerError::Provider(e) => e.is_retryable(),
            HandlerError::Fatal(_) | HandlerError::InvalidPayload(_) | HandlerError::Context(_) => {
                false
            }
        }
    }

    /// Short label used in metrics and log details.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Retryable(_) => "retryable",
            HandlerError::Fatal(_) => "fatal",
            HandlerError::InvalidPayload(_) => "invalid_payload",
            HandlerError::Provider(ProviderError::Exhausted(_)) => "chain_exhausted",
            HandlerError::Provider(ProviderError::Storage(_)) => "provider_storage",
            HandlerError::Context(_) => "context",
        }
    }
}

impl From<ChainExhausted> for HandlerError {
    fn from(e: ChainExhausted) -> Self {
        HandlerError::Provider(ProviderError::Exhausted(e))
    }
}

impl From<ProgressRegression> for HandlerError {
    fn from(e: ProgressRegression) -> Self {
        HandlerError::Context(ContextError::ProgressRegression(e))
    }
}

impl From<StorageError> for HandlerError {
    fn from(e: StorageError) -> Self {
        HandlerError::Context(ContextError::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_providers::{AttemptFailure, ProviderFailure};

    fn exhausted(failure: ProviderFailure) -> ChainExhausted {
        ChainExhausted {
            task: "transcription".into(),
            failures: vec![AttemptFailure {
                provider_id: "p1".into(),
                failure,
            }],
        }
    }

    #[test]
    fn test_handler_error_retryability() {
        assert!(HandlerError::retryable("timeout").is_retryable());
        assert!(!HandlerError::fatal("bad").is_retryable());
        assert!(!HandlerError::invalid_payload("missing asset_id").is_retryable());

        let transient: HandlerError = exhausted(ProviderFailure::retryable("503")).into();
        assert!(transient.is_retryable());

        let permanent: HandlerError = exhausted(ProviderFailure::non_retryable("400")).into();
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.kind(), "chain_exhausted");
    }

    #[test]
    fn test_provider_storage_error_kind() {
        let err = HandlerError::Provider(ProviderError::Storage(StorageError::not_found("p1")));
        assert_eq!(err.kind(), "provider_storage");
        assert!(!err.is_retryable());

        let exhausted: HandlerError = exhausted(ProviderFailure::retryable("503")).into();
        assert_eq!(exhausted.kind(), "chain_exhausted");
    }

    #[test]
    fn test_progress_regression_is_fatal() {
        let err: HandlerError = ProgressRegression {
            current: 50.0,
            requested: 10.0,
        }
        .into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("below current progress"));
    }
}
