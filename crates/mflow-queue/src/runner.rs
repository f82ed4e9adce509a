//! Execution seam between the queue and whatever runs jobs.

use std::time::Duration;

use async_trait::async_trait;

use mflow_models::JobId;

/// What the queue should do after a job id has been run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing further to schedule (completed, failed, or skipped).
    Finished,
    /// Re-submit the id at the tail of the backlog once the delay has elapsed.
    RetryAfter(Duration),
}

/// Runs one job attempt. Called by exactly one worker per dequeued id.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job_id: &JobId) -> RunOutcome;
}
