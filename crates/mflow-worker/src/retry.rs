//! Job-level retry policy with exponential backoff.
//!
//! Provider fallback handles transient failures inside one attempt; this
//! policy decides how long a re-queued job waits before its next attempt.

use std::str::FromStr;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Always wait the job's base `retry_delay`.
    Fixed,
    /// `retry_delay * 2^(attempt - 1)`, capped at `max_retry_delay`.
    #[default]
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" | "exp" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// Retry defaults applied at job creation and backoff applied on re-queue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `max_attempts` for jobs created without one
    pub default_max_attempts: u32,
    /// Base delay in seconds for jobs created without one
    pub default_retry_delay: f64,
    /// Upper bound for exponential backoff
    pub max_retry_delay: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            default_retry_delay: 1.0,
            max_retry_delay: Duration::from_secs(300),
            backoff: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create policy from environment variables.
    pub fn from_env() -> Self {
        Self {
            default_max_attempts: std::env::var("JOB_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            default_retry_delay: std::env::var("JOB_RETRY_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            max_retry_delay: Duration::from_secs(
                std::env::var("JOB_MAX_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            backoff: std::env::var("JOB_BACKOFF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Delay before `attempt` (1-based count of re-queues so far).
    pub fn delay_for_attempt(&self, base_delay_secs: f64, attempt: u32) -> Duration {
        let base = Duration::try_from_secs_f64(base_delay_secs).unwrap_or(Duration::ZERO);

        match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(self.max_retry_delay)
            }
        }
    }
}
