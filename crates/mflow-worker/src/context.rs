//! Per-attempt handle given to job handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use mflow_models::{JobId, JobRecord, JsonMap, LogLevel};
use mflow_storage::JobRepository;

use crate::error::ContextError;

/// Highest progress a running attempt may report. 100 is reserved for
/// completion.
pub const MAX_RUNNING_PROGRESS: f64 = 99.0;

/// Handle through which a handler reports logs and progress.
///
/// Every call persists the job record before returning, so observers see
/// updates while the handler is still running. Once the handler returns the
/// context is closed and every clone of it fails with [`ContextError::Closed`].
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    project_id: String,
    job_type: String,
    attempt: u32,
    record: Arc<Mutex<JobRecord>>,
    closed: Arc<AtomicBool>,
    store: Arc<dyn JobRepository>,
}

impl JobContext {
    pub(crate) fn new(record: Arc<Mutex<JobRecord>>, snapshot: &JobRecord, store: Arc<dyn JobRepository>) -> Self {
        Self {
            job_id: snapshot.id.clone(),
            project_id: snapshot.project_id.clone(),
            job_type: snapshot.job_type.clone(),
            attempt: snapshot.attempt,
            record,
            closed: Arc::new(AtomicBool::new(false)),
            store,
        }
    }

    /// Stop accepting updates and return the record as the attempt left it.
    ///
    /// The flag is set under the record lock, so no update can land after
    /// this returns.
    pub(crate) async fn close(&self) -> JobRecord {
        let record = self.record.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        record.clone()
    }

    fn ensure_open(&self) -> Result<(), ContextError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContextError::Closed);
        }
        Ok(())
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Zero-based attempt number of the current run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Append a log entry to the job.
    pub async fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        details: JsonMap,
    ) -> Result<(), ContextError> {
        let mut record = self.record.lock().await;
        self.ensure_open()?;
        record.push_log(level, message, details);
        self.store.update(&record).await?;
        Ok(())
    }

    /// Shorthand for an info entry without details.
    pub async fn info(&self, message: impl Into<String>) -> Result<(), ContextError> {
        self.log(message, LogLevel::Info, JsonMap::new()).await
    }

    /// Record progress, clamped to [0, 100] and held at
    /// [`MAX_RUNNING_PROGRESS`] until the job completes. Returns the stored
    /// value.
    ///
    /// Values below the last recorded progress are rejected with
    /// [`ContextError::ProgressRegression`] and leave the record untouched.
    pub async fn progress(&self, percent: f64, message: Option<&str>) -> Result<f64, ContextError> {
        let mut record = self.record.lock().await;
        self.ensure_open()?;
        let stored = record.advance_progress(percent.min(MAX_RUNNING_PROGRESS))?;

        if let Some(message) = message {
            let mut details = JsonMap::new();
            details.insert("progress".to_string(), stored.into());
            record.push_log(LogLevel::Info, message, details);
        }

        self.store.update(&record).await?;
        debug!(job_id = %self.job_id, progress = stored, "Job progress");
        Ok(stored)
    }

    /// Current state of the record as seen by this attempt.
    pub async fn snapshot(&self) -> JobRecord {
        self.record.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_storage::JsonJobStore;
    use tempfile::TempDir;

    async fn context(dir: &TempDir) -> (JobContext, Arc<dyn JobRepository>) {
        let store: Arc<dyn JobRepository> = Arc::new(JsonJobStore::in_dir(dir.path()));
        let mut record = JobRecord::new("demo", "stub", JsonMap::new(), 3, 0.0);
        record.start();
        store.add(&record).await.unwrap();

        let ctx = JobContext::new(Arc::new(Mutex::new(record.clone())), &record, Arc::clone(&store));
        (ctx, store)
    }

    #[tokio::test]
    async fn test_log_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let (ctx, store) = context(&dir).await;

        ctx.info("handler-started").await.unwrap();

        let stored = store.get(ctx.job_id()).await.unwrap().unwrap();
        assert_eq!(stored.logs.last().unwrap().message, "handler-started");
    }

    #[tokio::test]
    async fn test_progress_clamps_and_persists() {
        let dir = TempDir::new().unwrap();
        let (ctx, store) = context(&dir).await;

        assert_eq!(ctx.progress(50.0, Some("halfway")).await.unwrap(), 50.0);
        assert_eq!(ctx.progress(250.0, None).await.unwrap(), MAX_RUNNING_PROGRESS);
        assert_eq!(ctx.progress(100.0, None).await.unwrap(), MAX_RUNNING_PROGRESS);

        let stored = store.get(ctx.job_id()).await.unwrap().unwrap();
        assert_eq!(stored.progress, MAX_RUNNING_PROGRESS);
        assert!(stored.logs.iter().any(|l| l.message == "halfway"));
    }

    #[tokio::test]
    async fn test_progress_regression_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (ctx, store) = context(&dir).await;

        ctx.progress(60.0, None).await.unwrap();
        let err = ctx.progress(20.0, None).await.unwrap_err();

        assert!(matches!(err, ContextError::ProgressRegression(_)));
        assert_eq!(store.get(ctx.job_id()).await.unwrap().unwrap().progress, 60.0);
    }

    #[tokio::test]
    async fn test_closed_context_rejects_updates() {
        let dir = TempDir::new().unwrap();
        let (ctx, store) = context(&dir).await;
        let late = ctx.clone();

        ctx.progress(30.0, None).await.unwrap();
        let left = ctx.close().await;
        assert_eq!(left.progress, 30.0);

        assert!(matches!(late.info("too late").await, Err(ContextError::Closed)));
        assert!(matches!(late.progress(80.0, None).await, Err(ContextError::Closed)));

        let stored = store.get(ctx.job_id()).await.unwrap().unwrap();
        assert_eq!(stored.progress, 30.0);
        assert!(stored.logs.iter().all(|l| l.message != "too late"));
    }
}
