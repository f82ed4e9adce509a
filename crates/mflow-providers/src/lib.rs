//! AI provider selection.
//!
//! This crate provides:
//! - Fallback chain resolution (project/task overrides, global priority, registration order)
//! - Chain invocation with per-provider failure classification and usage accounting
//! - An HTTP task client for providers exposing a JSON task endpoint

pub mod chain;
pub mod error;
pub mod http;
pub mod metrics;
pub mod selector;

pub use chain::resolve_chain;
pub use error::{AttemptFailure, ChainExhausted, ProviderError, ProviderFailure, ProviderResult};
pub use http::{HttpClientConfig, HttpTaskClient};
pub use selector::{ProviderResponse, ProviderSelector};
