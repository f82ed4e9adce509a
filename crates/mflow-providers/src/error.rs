//! Provider error types.

use std::fmt;

use thiserror::Error;

use mflow_storage::StorageError;

/// Result type for provider selection.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Classified failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    /// Credentials or endpoint absent; fatal for this provider only.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Deterministic failure such as bad input.
    #[error("Non-retryable failure: {0}")]
    NonRetryable(String),

    /// Transient failure (timeouts, rate limits, upstream 5xx).
    #[error("Retryable failure: {0}")]
    Retryable(String),
}

impl ProviderFailure {
    pub fn missing_configuration(msg: impl Into<String>) -> Self {
        Self::MissingConfiguration(msg.into())
    }

    pub fn non_retryable(msg: impl Into<String>) -> Self {
        Self::NonRetryable(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderFailure::Retryable(_))
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderFailure::MissingConfiguration(_) => "missing_configuration",
            ProviderFailure::NonRetryable(_) => "non_retryable",
            ProviderFailure::Retryable(_) => "retryable",
        }
    }
}

/// One provider's failure within a chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub failure: ProviderFailure,
}

/// Every provider in the chain failed (or the chain was empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainExhausted {
    pub task: String,
    pub failures: Vec<AttemptFailure>,
}

impl ChainExhausted {
    /// Retryable at job level if any member failure was transient.
    pub fn is_retryable(&self) -> bool {
        self.failures.iter().any(|f| f.failure.is_retryable())
    }

    /// IDs of the providers that were tried, in order.
    pub fn attempted(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.provider_id.as_str()).collect()
    }
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "No usable provider for task '{}'", self.task);
        }

        write!(f, "All providers failed for task '{}': ", self.task)?;
        for (i, attempt) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", attempt.provider_id, attempt.failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainExhausted {}

/// Errors surfaced by the provider selector.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Exhausted(#[from] ChainExhausted),

    #[error("Provider registry error: {0}")]
    Storage(#[from] StorageError),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Exhausted(e) => e.is_retryable(),
            ProviderError::Storage(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_exhausted_retryability() {
        let fatal_only = ChainExhausted {
            task: "transcription".into(),
            failures: vec![AttemptFailure {
                provider_id: "p1".into(),
                failure: ProviderFailure::non_retryable("bad input"),
            }],
        };
        assert!(!fatal_only.is_retryable());

        let mut mixed = fatal_only.clone();
        mixed.failures.push(AttemptFailure {
            provider_id: "p2".into(),
            failure: ProviderFailure::retryable("503"),
        });
        assert!(mixed.is_retryable());
        assert_eq!(mixed.attempted(), ["p1", "p2"]);
        assert!(mixed.to_string().contains("p2: Retryable failure: 503"));
    }

    #[test]
    fn test_empty_chain_message() {
        let empty = ChainExhausted {
            task: "export".into(),
            failures: Vec::new(),
        };
        assert!(!empty.is_retryable());
        assert_eq!(empty.to_string(), "No usable provider for task 'export'");
    }
}
