//! Provider selection and fallback invocation.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use mflow_models::{ProviderRecord, UsageDelta};
use mflow_storage::ProviderRegistry;

use crate::chain::resolve_chain;
use crate::error::{AttemptFailure, ChainExhausted, ProviderFailure, ProviderResult};
use crate::metrics::{record_call, record_exhausted};

/// Successful provider call with its accounting data.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse<T> {
    pub value: T,
    /// Cost reported by the call; falls back to the provider's flat rate
    pub cost: Option<f64>,
    pub tokens: u64,
}

impl<T> ProviderResponse<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            cost: None,
            tokens: 0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }
}

/// Resolves provider chains and walks them until one provider succeeds.
///
/// The chain is the retry mechanism: a transient failure moves on to the
/// next candidate instead of repeating the same provider.
#[derive(Clone)]
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
}

impl ProviderSelector {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Ordered provider IDs for a project's task.
    pub async fn resolve_chain(&self, project_id: &str, task: &str) -> ProviderResult<Vec<String>> {
        let state = self.registry.load_state().await?;
        let chain = resolve_chain(&state, project_id, task);
        debug!(project_id, task, chain = ?chain, "Resolved provider chain");
        Ok(chain)
    }

    /// Call providers in chain order until one succeeds.
    ///
    /// Every attempted provider gets a usage entry; providers after the
    /// successful one are never called.
    pub async fn invoke<T, F, Fut>(&self, task: &str, chain: &[String], mut call: F) -> ProviderResult<T>
    where
        F: FnMut(ProviderRecord) -> Fut,
        Fut: Future<Output = Result<ProviderResponse<T>, ProviderFailure>>,
    {
        let state = self.registry.load_state().await?;
        let mut failures = Vec::new();

        for provider_id in chain {
            let record = match state.provider(provider_id) {
                Some(record) if record.configured => record.clone(),
                Some(_) => {
                    failures.push(AttemptFailure {
                        provider_id: provider_id.clone(),
                        failure: ProviderFailure::missing_configuration("credentials not configured"),
                    });
                    continue;
                }
                None => {
                    failures.push(AttemptFailure {
                        provider_id: provider_id.clone(),
                        failure: ProviderFailure::missing_configuration("provider not registered"),
                    });
                    continue;
                }
            };

            let flat_cost = record.cost_per_request;
            let started = Instant::now();
            let outcome = call(record).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(response) => {
                    let cost = response.cost.or(flat_cost).unwrap_or(0.0);
                    self.record_usage(provider_id, UsageDelta::success(cost, response.tokens))
                        .await;
                    record_call(provider_id, task, "success", latency_ms);
                    info!(
                        provider = %provider_id,
                        task,
                        failed_before = failures.len(),
                        "Provider call succeeded"
                    );
                    return Ok(response.value);
                }
                Err(failure) => {
                    warn!(
                        provider = %provider_id,
                        task,
                        kind = failure.kind(),
                        "Provider call failed, advancing chain: {}",
                        failure
                    );
                    self.record_usage(provider_id, UsageDelta::failure(failure.to_string()))
                        .await;
                    record_call(provider_id, task, failure.kind(), latency_ms);
                    failures.push(AttemptFailure {
                        provider_id: provider_id.clone(),
                        failure,
                    });
                }
            }
        }

        record_exhausted(task);
        Err(ChainExhausted {
            task: task.to_string(),
            failures,
        }
        .into())
    }

    /// Resolve the chain for a project's task and invoke it.
    pub async fn run<T, F, Fut>(&self, project_id: &str, task: &str, call: F) -> ProviderResult<T>
    where
        F: FnMut(ProviderRecord) -> Fut,
        Fut: Future<Output = Result<ProviderResponse<T>, ProviderFailure>>,
    {
        let chain = self.resolve_chain(project_id, task).await?;
        self.invoke(task, &chain, call).await
    }

    async fn record_usage(&self, provider_id: &str, delta: UsageDelta) {
        // A ledger write failure must not turn a provider result into an error.
        if let Err(e) = self.registry.record_usage(provider_id, &delta).await {
            warn!(provider = %provider_id, "Failed to record provider usage: {}", e);
        }
    }
}
