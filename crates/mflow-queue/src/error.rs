//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue workers already started")]
    AlreadyStarted,

    #[error("Queue is stopped")]
    Stopped,

    #[error("Drain timed out with {pending} jobs outstanding")]
    DrainTimeout { pending: usize },
}

impl QueueError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
