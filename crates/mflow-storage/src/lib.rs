//! Durable JSON document stores.
//!
//! This crate provides:
//! - Atomic temp-file-then-rename document writes
//! - The job ledger (`JobRepository` / `JsonJobStore`)
//! - The provider registry (configuration, preferences, usage)

pub mod error;
pub mod fs;
pub mod job_store;
pub mod provider_registry;

pub use error::{StorageError, StorageResult};
pub use job_store::{JobRepository, JsonJobStore};
pub use provider_registry::ProviderRegistry;
