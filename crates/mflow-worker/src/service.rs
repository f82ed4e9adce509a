//! Job service: creation, execution and retry decisions.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

use mflow_models::{JobId, JobRecord, JobStatus, JsonMap, LogLevel};
use mflow_queue::{JobRunner, RunOutcome};
use mflow_storage::JobRepository;

use crate::context::JobContext;
use crate::error::{HandlerError, WorkerError, WorkerResult};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::logging::JobLogger;
use crate::metrics::{record_attempt, record_job_event};
use crate::retry::RetryPolicy;

/// Parameters for a new job. Unset retry fields take the service defaults.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub project_id: String,
    pub job_type: String,
    pub payload: JsonMap,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<f64>,
}

impl NewJob {
    pub fn new(project_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            job_type: job_type.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retry_delay(mut self, seconds: f64) -> Self {
        self.retry_delay = Some(seconds);
        self
    }
}

/// Result of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    /// Re-queued; the caller should re-submit after `delay`.
    Retry { delay: Duration },
    /// Record was not QUEUED; nothing ran.
    Skipped,
}

/// Owns the handler registry and drives job records through their lifecycle.
pub struct JobService {
    store: Arc<dyn JobRepository>,
    handlers: HandlerRegistry,
    retry: RetryPolicy,
}

impl JobService {
    pub fn new(store: Arc<dyn JobRepository>, retry: RetryPolicy) -> Self {
        Self {
            store,
            handlers: HandlerRegistry::new(),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobRepository> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Bind a job type to a handler; the last registration wins.
    pub fn register_handler<H: JobHandler>(&self, job_type: impl Into<String>, handler: H) -> WorkerResult<()> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(WorkerError::validation("job_type must not be empty"));
        }

        if self.handlers.register(job_type.clone(), Arc::new(handler)) {
            info!(job_type = %job_type, "Replaced job handler");
        } else {
            debug!(job_type = %job_type, "Registered job handler");
        }
        Ok(())
    }

    pub fn job_types(&self) -> Vec<String> {
        self.handlers.job_types()
    }

    /// Validate and persist a new QUEUED job.
    pub async fn create_job(&self, new: NewJob) -> WorkerResult<JobRecord> {
        if new.project_id.trim().is_empty() {
            return Err(WorkerError::validation("project_id must not be empty"));
        }
        if new.job_type.trim().is_empty() {
            return Err(WorkerError::validation("job_type must not be empty"));
        }

        let max_attempts = new.max_attempts.unwrap_or(self.retry.default_max_attempts);
        if max_attempts < 1 {
            return Err(WorkerError::validation("max_attempts must be at least 1"));
        }

        let retry_delay = new.retry_delay.unwrap_or(self.retry.default_retry_delay);
        if !retry_delay.is_finite() || retry_delay < 0.0 {
            return Err(WorkerError::validation(
                "retry_delay must be a finite, non-negative number of seconds",
            ));
        }

        if !self.handlers.contains(&new.job_type) {
            return Err(WorkerError::UnknownJobType(new.job_type));
        }

        let mut record = JobRecord::new(new.project_id, new.job_type, new.payload, max_attempts, retry_delay);
        record.push_log(LogLevel::Info, "Job created", JsonMap::new());
        self.store.add(&record).await?;

        record_job_event(&record.job_type, "created");
        info!(
            job_id = %record.id,
            project_id = %record.project_id,
            job_type = %record.job_type,
            "Job created"
        );
        Ok(record)
    }

    pub async fn get_job(&self, job_id: &JobId) -> WorkerResult<JobRecord> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))
    }

    /// Jobs of a project, newest first, optionally filtered by status.
    pub async fn list_jobs(&self, project_id: &str, status: Option<JobStatus>) -> WorkerResult<Vec<JobRecord>> {
        Ok(self.store.list_by_project(project_id, status).await?)
    }

    /// Returns false if no such job existed.
    pub async fn delete_job(&self, job_id: &JobId) -> WorkerResult<bool> {
        Ok(self.store.delete(job_id).await?)
    }

    /// Run one attempt of a QUEUED job and persist the resulting transition.
    ///
    /// The QUEUED -> RUNNING move is a store-level claim, so concurrent calls
    /// for the same job run the handler at most once.
    pub async fn execute(&self, job_id: &JobId) -> WorkerResult<ExecutionOutcome> {
        let current = self.get_job(job_id).await?;
        if current.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %current.status, "Skipping job that is not queued");
            return Ok(ExecutionOutcome::Skipped);
        }

        let Some(mut record) = self.store.claim(job_id).await? else {
            debug!(job_id = %job_id, "Job already claimed by another worker");
            return Ok(ExecutionOutcome::Skipped);
        };

        let logger = JobLogger::new(&record.id, &record.job_type, record.attempt);

        let Some(handler) = self.handlers.get(&record.job_type) else {
            let message = format!("No handler registered for job type '{}'", record.job_type);
            logger.log_failure(&message);
            record.push_log(LogLevel::Error, message.clone(), JsonMap::new());
            record.fail(message);
            self.store.update(&record).await?;
            return Ok(ExecutionOutcome::Failed);
        };

        record.push_log(
            LogLevel::Info,
            "Job started",
            details(json!({ "attempt": record.attempt })),
        );
        self.store.update(&record).await?;
        logger.log_start();

        let payload = record.payload.clone();
        let shared = Arc::new(Mutex::new(record.clone()));
        let ctx = JobContext::new(shared, &record, Arc::clone(&self.store));
        let attempt_ctx = ctx.clone();

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(ctx, payload))
            .catch_unwind()
            .instrument(logger.create_span())
            .await
            .unwrap_or_else(|panic| Err(HandlerError::fatal(panic_message(panic))));
        let elapsed = started.elapsed();

        // Pick up logs and progress the handler recorded, and cut off any
        // context clone the handler kept.
        let mut record = attempt_ctx.close().await;

        let outcome = match result {
            Ok(output) => {
                record.complete(output);
                record.push_log(LogLevel::Info, "Job completed", JsonMap::new());
                self.store.update(&record).await?;

                logger.log_completion(elapsed.as_millis());
                record_attempt(&record.job_type, "completed", elapsed);
                ExecutionOutcome::Completed
            }
            Err(err) if err.is_retryable() && record.can_retry() => {
                let message = err.to_string();
                record.requeue(message.clone());
                let delay = self.retry.delay_for_attempt(record.retry_delay, record.attempt);
                record.push_log(
                    LogLevel::Warning,
                    format!("Attempt failed, retrying: {}", message),
                    details(json!({
                        "error_kind": err.kind(),
                        "attempt": record.attempt,
                        "delay_seconds": delay.as_secs_f64(),
                    })),
                );
                self.store.update(&record).await?;

                logger.log_retry(&message, delay.as_millis());
                record_attempt(&record.job_type, "retry", elapsed);
                ExecutionOutcome::Retry { delay }
            }
            Err(err) => {
                let message = err.to_string();
                record.fail(message.clone());
                record.push_log(
                    LogLevel::Error,
                    format!("Job failed: {}", message),
                    details(json!({ "error_kind": err.kind(), "attempt": record.attempt })),
                );
                self.store.update(&record).await?;

                logger.log_failure(&message);
                record_attempt(&record.job_type, "failed", elapsed);
                ExecutionOutcome::Failed
            }
        };

        Ok(outcome)
    }

    /// Reset jobs left RUNNING by a previous process and return every QUEUED
    /// job ID, oldest first.
    pub async fn recover_jobs(&self) -> WorkerResult<Vec<JobId>> {
        let interrupted = self.store.list_by_status(JobStatus::Running).await?;

        for mut record in interrupted {
            warn!(job_id = %record.id, job_type = %record.job_type, "Recovering interrupted job");
            record.status = JobStatus::Queued;
            record.progress = 0.0;
            record.push_log(
                LogLevel::Warning,
                "Job was interrupted and has been re-queued",
                JsonMap::new(),
            );
            self.store.update(&record).await?;
            record_job_event(&record.job_type, "recovered");
        }

        let queued = self.store.list_by_status(JobStatus::Queued).await?;
        if !queued.is_empty() {
            info!("Recovered {} queued jobs", queued.len());
        }
        Ok(queued.into_iter().map(|r| r.id).collect())
    }
}

#[async_trait]
impl JobRunner for JobService {
    async fn run(&self, job_id: &JobId) -> RunOutcome {
        match self.execute(job_id).await {
            Ok(ExecutionOutcome::Retry { delay }) => RunOutcome::RetryAfter(delay),
            Ok(_) => RunOutcome::Finished,
            Err(e) => {
                error!(job_id = %job_id, "Job execution error: {}", e);
                RunOutcome::Finished
            }
        }
    }
}

fn details(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Handler panicked: {}", reason)
}
