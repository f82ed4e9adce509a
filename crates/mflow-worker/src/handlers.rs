//! Built-in provider-backed job handlers.
//!
//! Each built-in job type maps to a provider task of the same name. The
//! handler walks the project's provider chain through [`ProviderSelector`]
//! and stores the first successful provider response as the job result.

use async_trait::async_trait;
use tracing::debug;

use mflow_models::{JsonMap, LogLevel};
use mflow_providers::{HttpTaskClient, ProviderSelector};

use crate::context::JobContext;
use crate::error::{HandlerError, WorkerResult};
use crate::handler::JobHandler;
use crate::service::JobService;

/// Job types served by [`ProviderTaskHandler`] out of the box.
pub const BUILTIN_TASKS: [&str; 4] = ["ingest", "scene_detection", "transcription", "export"];

/// Runs a provider task for the job payload.
#[derive(Clone)]
pub struct ProviderTaskHandler {
    task: String,
    selector: ProviderSelector,
    client: HttpTaskClient,
}

impl ProviderTaskHandler {
    pub fn new(task: impl Into<String>, selector: ProviderSelector, client: HttpTaskClient) -> Self {
        Self {
            task: task.into(),
            selector,
            client,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }
}

#[async_trait]
impl JobHandler for ProviderTaskHandler {
    async fn handle(&self, ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
        let chain = self
            .selector
            .resolve_chain(ctx.project_id(), &self.task)
            .await?;

        let mut details = JsonMap::new();
        details.insert("task".to_string(), self.task.clone().into());
        details.insert("chain".to_string(), chain.clone().into());
        ctx.log("Resolved provider chain", LogLevel::Debug, details)
            .await?;
        ctx.progress(10.0, None).await?;

        let task = self.task.as_str();
        let client = &self.client;
        let payload = &payload;
        let mut output = self
            .selector
            .invoke(task, &chain, |provider| async move {
                debug!(provider = %provider.id, task, "Dispatching provider task");
                client.call_task(&provider, task, payload).await
            })
            .await?;

        ctx.progress(90.0, Some("Provider task finished")).await?;

        output
            .entry("task".to_string())
            .or_insert_with(|| self.task.clone().into());
        Ok(output)
    }
}

/// Register a [`ProviderTaskHandler`] for every built-in job type.
pub fn register_builtin_handlers(
    service: &JobService,
    selector: &ProviderSelector,
    client: &HttpTaskClient,
) -> WorkerResult<()> {
    for task in BUILTIN_TASKS {
        service.register_handler(task, ProviderTaskHandler::new(task, selector.clone(), client.clone()))?;
    }
    Ok(())
}
