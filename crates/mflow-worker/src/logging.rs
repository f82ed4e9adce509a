//! Structured job logging utilities.
//!
//! `JobLogger` emits lifecycle lines with consistent fields (job ID, job type,
//! attempt); `init_tracing` installs the process-wide subscriber.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mflow_models::JobId;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    job_type: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a new job logger for one attempt of a job.
    pub fn new(job_id: &JobId, job_type: &str, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            attempt,
        }
    }

    pub fn log_start(&self) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job started"
        );
    }

    pub fn log_completion(&self, elapsed_ms: u128) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            elapsed_ms = elapsed_ms as u64,
            "Job completed"
        );
    }

    pub fn log_retry(&self, error: &str, delay_ms: u128) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            delay_ms = delay_ms as u64,
            "Job attempt failed, retry scheduled: {}", error
        );
    }

    pub fn log_failure(&self, error: &str) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job failed: {}", error
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Span covering one attempt; handler logs emitted inside carry the job fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt
        )
    }
}

/// Initialize tracing: colored output for dev, JSON when `LOG_FORMAT=json`.
///
/// Filter comes from `RUST_LOG`, with `mflow=info` added.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "mflow=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "transcription", 1);

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.job_type(), "transcription");
    }

    #[test]
    fn test_logging_without_subscriber() {
        let logger = JobLogger::new(&JobId::from_string("job-1"), "stub", 0);
        let _span = logger.create_span().entered();
        logger.log_start();
        logger.log_retry("timeout", 500);
        logger.log_failure("boom");
    }
}
