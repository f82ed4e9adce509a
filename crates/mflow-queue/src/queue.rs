//! Bounded worker pool consuming job ids from a FIFO backlog.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use mflow_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::runner::{JobRunner, RunOutcome};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks (simultaneous job executions)
    pub concurrency: usize,
    /// Backlog bound; 0 means unbounded
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_size: 1000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            concurrency: std::env::var("QUEUE_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            max_size: std::env::var("QUEUE_MAX_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.concurrency == 0 {
            return Err(QueueError::invalid_config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

enum BacklogSender {
    Bounded(mpsc::Sender<JobId>),
    Unbounded(mpsc::UnboundedSender<JobId>),
}

impl BacklogSender {
    async fn send(&self, job_id: JobId) -> bool {
        match self {
            BacklogSender::Bounded(tx) => tx.send(job_id).await.is_ok(),
            BacklogSender::Unbounded(tx) => tx.send(job_id).is_ok(),
        }
    }
}

enum BacklogReceiver {
    Bounded(mpsc::Receiver<JobId>),
    Unbounded(mpsc::UnboundedReceiver<JobId>),
}

impl BacklogReceiver {
    async fn recv(&mut self) -> Option<JobId> {
        match self {
            BacklogReceiver::Bounded(rx) => rx.recv().await,
            BacklogReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<JobId> {
        match self {
            BacklogReceiver::Bounded(rx) => rx.try_recv().ok(),
            BacklogReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Resolves once the shutdown flag is set. The watch guard is released
/// before returning so callers stay `Send` across later awaits.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// State shared by the queue handle, its workers and retry timers.
struct Shared {
    runner: Arc<dyn JobRunner>,
    sender: BacklogSender,
    receiver: Mutex<BacklogReceiver>,
    /// Backlog + in-flight + scheduled retries
    outstanding: watch::Sender<usize>,
    in_flight: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Push an id onto the backlog, giving up if the queue stops while waiting for space.
    async fn enqueue(&self, job_id: JobId) -> QueueResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            sent = self.sender.send(job_id) => {
                if sent { Ok(()) } else { Err(QueueError::Stopped) }
            }
            _ = stopped(&mut shutdown) => Err(QueueError::Stopped),
        }
    }

    fn add_outstanding(&self) {
        self.outstanding.send_modify(|n| *n += 1);
    }

    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// One unit of outstanding work counted before its id reaches the backlog.
struct Reservation<'a> {
    shared: &'a Shared,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.add_outstanding();
        Self {
            shared,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.shared.finish_one();
        }
    }
}

/// Fixed-size pool of workers pulling job ids in FIFO order.
///
/// Each dequeued id is handed to exactly one worker, so a job never runs
/// twice at the same time as long as it is only submitted once per attempt.
pub struct JobQueue {
    config: QueueConfig,
    shared: Arc<Shared>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl JobQueue {
    /// Create a queue. Workers are not running until [`JobQueue::start`].
    pub fn new(config: QueueConfig, runner: Arc<dyn JobRunner>) -> QueueResult<Self> {
        config.validate()?;

        let (sender, receiver) = if config.max_size > 0 {
            let (tx, rx) = mpsc::channel(config.max_size);
            (BacklogSender::Bounded(tx), BacklogReceiver::Bounded(rx))
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (BacklogSender::Unbounded(tx), BacklogReceiver::Unbounded(rx))
        };
        let (outstanding, _) = watch::channel(0usize);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                runner,
                sender,
                receiver: Mutex::new(receiver),
                outstanding,
                in_flight: AtomicUsize::new(0),
                shutdown,
            }),
            workers: std::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Launch the worker tasks.
    pub fn start(&self) -> QueueResult<()> {
        if self.shared.is_stopped() {
            return Err(QueueError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }

        info!(
            "Starting job queue with {} workers (max backlog: {})",
            self.config.concurrency,
            if self.config.max_size == 0 {
                "unbounded".to_string()
            } else {
                self.config.max_size.to_string()
            }
        );

        let handles: Vec<_> = (0..self.config.concurrency)
            .map(|index| tokio::spawn(worker_loop(Arc::clone(&self.shared), index)))
            .collect();

        match self.workers.lock() {
            Ok(mut workers) => workers.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
        Ok(())
    }

    /// Enqueue a job id, waiting for space when the backlog is full.
    pub async fn submit(&self, job_id: JobId) -> QueueResult<()> {
        if self.shared.is_stopped() {
            return Err(QueueError::Stopped);
        }

        // Released if the send fails or the caller drops this future while blocked.
        let reservation = Reservation::new(&self.shared);
        let id = job_id.clone();
        self.shared.enqueue(job_id).await?;
        reservation.commit();

        debug!(job_id = %id, "Job submitted");
        Ok(())
    }

    /// Stop dequeuing, abandon pending retry timers and wait for in-flight runs.
    pub async fn stop(&self) {
        if self.shared.shutdown.send_replace(true) {
            debug!("Job queue already stopped");
        }

        let handles: Vec<_> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        if !handles.is_empty() {
            info!("Waiting for {} workers to finish in-flight jobs...", handles.len());
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        // Ids never dequeued stay QUEUED in the job store; they are no longer
        // outstanding work for this queue.
        let abandoned = {
            let mut receiver = self.shared.receiver.lock().await;
            let mut count = 0usize;
            while receiver.try_recv().is_some() {
                count += 1;
            }
            count
        };
        for _ in 0..abandoned {
            self.shared.finish_one();
        }
        if abandoned > 0 {
            info!("Dropped {} queued jobs from the backlog on stop", abandoned);
        }

        info!("Job queue stopped");
    }

    /// Wait until backlog, in-flight runs and scheduled retries are all empty.
    ///
    /// After [`JobQueue::stop`] the backlog no longer counts, so this resolves
    /// as soon as abandoned retry timers have exited.
    pub async fn drain(&self, timeout: Duration) -> QueueResult<()> {
        let mut outstanding = self.shared.outstanding.subscribe();
        let idle = async {
            // The sender lives in `self.shared`, so the channel cannot close here.
            let _ = outstanding.wait_for(|n| *n == 0).await;
        };

        tokio::time::timeout(timeout, idle)
            .await
            .map_err(|_| QueueError::DrainTimeout {
                pending: self.pending(),
            })
    }

    /// Outstanding work: queued, running, or waiting to be retried.
    pub fn pending(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Jobs currently being run by a worker.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shared.is_stopped()
    }
}

async fn worker_loop(shared: Arc<Shared>, index: usize) {
    let mut shutdown = shared.shutdown.subscribe();
    debug!(worker = index, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => None,
            job_id = async { shared.receiver.lock().await.recv().await } => job_id,
        };
        let Some(job_id) = next else {
            break;
        };

        let running = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("job_queue_in_flight").set(running as f64);
        debug!(worker = index, job_id = %job_id, "Dequeued job");

        let outcome = shared.runner.run(&job_id).await;

        let running = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("job_queue_in_flight").set(running as f64);

        match outcome {
            RunOutcome::Finished => shared.finish_one(),
            RunOutcome::RetryAfter(delay) => schedule_retry(&shared, job_id, delay),
        }
    }

    debug!(worker = index, "Worker stopped");
}

/// Re-submit after `delay` without holding a worker. The outstanding count
/// carries over from the run that asked for the retry.
fn schedule_retry(shared: &Arc<Shared>, job_id: JobId, delay: Duration) {
    let shared = Arc::clone(shared);
    debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Retry scheduled");

    tokio::spawn(async move {
        let mut shutdown = shared.shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if shared.enqueue(job_id.clone()).await.is_err() {
                    debug!(job_id = %job_id, "Retry dropped, queue stopped");
                    shared.finish_one();
                }
            }
            _ = stopped(&mut shutdown) => {
                debug!(job_id = %job_id, "Retry timer abandoned on stop");
                shared.finish_one();
            }
        }
    });
}
