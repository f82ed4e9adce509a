//! Application context wiring stores, providers, service and queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use mflow_models::JobRecord;
use mflow_providers::{HttpTaskClient, ProviderSelector};
use mflow_queue::{JobQueue, JobRunner};
use mflow_storage::{JobRepository, JsonJobStore, ProviderRegistry};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::register_builtin_handlers;
use crate::service::{JobService, NewJob};

/// Everything a running worker needs, built once at startup.
pub struct AppContext {
    pub config: WorkerConfig,
    pub registry: Arc<ProviderRegistry>,
    pub selector: ProviderSelector,
    pub service: Arc<JobService>,
    pub queue: JobQueue,
}

impl AppContext {
    /// Build the context. Handlers are registered separately on `service`.
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let store: Arc<dyn JobRepository> = Arc::new(JsonJobStore::in_dir(&config.data_dir));
        let registry = Arc::new(ProviderRegistry::in_dir(&config.data_dir));
        let selector = ProviderSelector::new(Arc::clone(&registry));
        let service = Arc::new(JobService::new(store, config.retry.clone()));

        let runner: Arc<dyn JobRunner> = Arc::clone(&service) as Arc<dyn JobRunner>;
        let queue = JobQueue::new(config.queue.clone(), runner)?;

        Ok(Self {
            config,
            registry,
            selector,
            service,
            queue,
        })
    }

    /// Register the provider-backed handlers for the built-in job types.
    pub fn register_builtin_handlers(&self) -> WorkerResult<()> {
        let client = HttpTaskClient::new(self.config.http.clone())
            .map_err(|e| WorkerError::config(format!("failed to build HTTP client: {}", e)))?;
        register_builtin_handlers(&self.service, &self.selector, &client)
    }

    /// Recover persisted jobs, start the workers and re-submit queued jobs.
    ///
    /// Returns the number of re-submitted jobs.
    pub async fn start(&self) -> WorkerResult<usize> {
        let recovered = self.service.recover_jobs().await?;
        self.queue.start()?;

        for job_id in &recovered {
            self.queue.submit(job_id.clone()).await?;
        }

        info!(
            "Worker started with {} workers, {} jobs re-submitted",
            self.config.queue.concurrency,
            recovered.len()
        );
        Ok(recovered.len())
    }

    /// Create a job and hand it to the queue.
    pub async fn submit_job(&self, new: NewJob) -> WorkerResult<JobRecord> {
        let record = self.service.create_job(new).await?;
        self.queue.submit(record.id.clone()).await?;
        Ok(record)
    }

    /// Wait until no job is queued, running or awaiting a retry.
    pub async fn drain(&self, timeout: Duration) -> WorkerResult<()> {
        Ok(self.queue.drain(timeout).await?)
    }

    /// Stop the queue, waiting at most `shutdown_timeout` for in-flight jobs.
    pub async fn shutdown(&self) {
        let timeout = self.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.queue.stop()).await.is_err() {
            warn!(
                "In-flight jobs did not finish within {:?}; they will be recovered on next start",
                timeout
            );
        }
    }
}
