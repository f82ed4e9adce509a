//! In-process job queue.
//!
//! This crate provides:
//! - A FIFO backlog with optional bound and submission backpressure
//! - A fixed pool of worker tasks handing each job id to exactly one worker
//! - Delayed retry re-submission that does not hold a worker slot
//! - Cooperative stop and a drain helper

pub mod error;
pub mod queue;
pub mod runner;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig};
pub use runner::{JobRunner, RunOutcome};
