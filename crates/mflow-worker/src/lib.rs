//! Job orchestration worker.
//!
//! This crate provides:
//! - The job service (handler registry, creation, execution, retry decisions)
//! - Per-attempt job contexts for logs and progress
//! - Built-in provider-backed handlers
//! - Application wiring, startup recovery and graceful shutdown

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod service;

pub use app::AppContext;
pub use config::WorkerConfig;
pub use context::{JobContext, MAX_RUNNING_PROGRESS};
pub use error::{ContextError, HandlerError, WorkerError, WorkerResult};
pub use handler::{HandlerRegistry, JobHandler};
pub use handlers::{ProviderTaskHandler, BUILTIN_TASKS};
pub use logging::JobLogger;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use service::{ExecutionOutcome, JobService, NewJob};
