//! Shared data models for the MediaFlow orchestration core.
//!
//! This crate provides Serde-serializable types for:
//! - Job records, their status machine and log entries
//! - Provider records, usage ledgers and preference overrides

pub mod job;
pub mod provider;

// Re-export common types
pub use job::{JobId, JobRecord, JobStatus, JsonMap, LogEntry, LogLevel, ProgressRegression};
pub use provider::{
    ProjectOverrides, ProviderPreferences, ProviderRecord, ProviderSettings, ProviderState,
    ProviderUsage, UsageDelta,
};
