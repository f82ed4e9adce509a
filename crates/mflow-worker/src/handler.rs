//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use mflow_models::JsonMap;

use crate::context::JobContext;
use crate::error::HandlerError;

/// Executes one job type.
///
/// The returned map is merged into the job's `result` on success.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, JsonMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonMap, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
        (self)(ctx, payload).await
    }
}

/// Job type to handler mapping. Re-registering a type replaces its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `job_type` to `handler`. Returns true if a previous handler was replaced.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> bool {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.insert(job_type.into(), handler).is_some()
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.get(job_type).is_some()
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: JobContext, _payload: JsonMap) -> Result<JsonMap, HandlerError> {
        Ok(JsonMap::new())
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let registry = HandlerRegistry::new();

        assert!(!registry.register("stub", Arc::new(noop)));
        assert!(registry.register("stub", Arc::new(noop)));
        assert!(registry.contains("stub"));
        assert!(!registry.contains("other"));
        assert_eq!(registry.job_types(), ["stub"]);
    }
}
