//! Built-in provider-backed jobs against mock provider endpoints.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mflow_models::{JobStatus, ProviderRecord};
use mflow_queue::QueueConfig;
use mflow_worker::{AppContext, NewJob, WorkerConfig, BUILTIN_TASKS};

const DRAIN: Duration = Duration::from_secs(10);

async fn app(dir: &TempDir) -> AppContext {
    let mut config = WorkerConfig::with_data_dir(dir.path());
    config.queue = QueueConfig {
        concurrency: 1,
        max_size: 10,
    };
    config.retry.default_retry_delay = 0.01;
    config.http.request_timeout = Duration::from_secs(5);

    let app = AppContext::new(config).unwrap();
    app.register_builtin_handlers().unwrap();
    app.start().await.unwrap();
    app
}

async fn provider_server(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/transcription"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_builtin_handlers_are_registered() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let mut expected: Vec<String> = BUILTIN_TASKS.iter().map(|t| t.to_string()).collect();
    expected.sort();
    assert_eq!(app.service.job_types(), expected);

    app.shutdown().await;
}

#[tokio::test]
async fn test_transcription_falls_back_to_second_provider() {
    let dir = TempDir::new().unwrap();
    let down = provider_server(503, json!({"error": "overloaded"})).await;
    let up = provider_server(200, json!({"result": {"text": "hello"}, "cost": 0.25, "tokens": 9})).await;

    let app = app(&dir).await;
    app.registry
        .register_provider(ProviderRecord::new("p1", ["transcription"]).with_endpoint(down.uri()))
        .await
        .unwrap();
    app.registry
        .register_provider(ProviderRecord::new("p2", ["transcription"]).with_endpoint(up.uri()))
        .await
        .unwrap();

    let record = app
        .submit_job(NewJob::new("demo", "transcription"))
        .await
        .unwrap();
    app.drain(DRAIN).await.unwrap();

    let job = app.service.get_job(&record.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.get("text"), Some(&json!("hello")));
    assert_eq!(job.result.get("task"), Some(&json!("transcription")));

    let usage = app.registry.usage_summary().await.unwrap();
    assert_eq!(usage["p1"].failures, 1);
    assert_eq!(usage["p1"].successes, 0);
    assert_eq!(usage["p2"].successes, 1);
    assert_eq!(usage["p2"].tokens, 9);

    app.shutdown().await;
}

#[tokio::test]
async fn test_project_override_picks_provider() {
    let dir = TempDir::new().unwrap();
    let first = provider_server(200, json!({"result": {"text": "from p1"}})).await;
    let second = provider_server(200, json!({"result": {"text": "from p2"}})).await;

    let app = app(&dir).await;
    app.registry
        .register_provider(ProviderRecord::new("p1", ["transcription"]).with_endpoint(first.uri()))
        .await
        .unwrap();
    app.registry
        .register_provider(ProviderRecord::new("p2", ["transcription"]).with_endpoint(second.uri()))
        .await
        .unwrap();
    app.registry
        .set_project_task_override("demo", "transcription", vec!["p2".to_string()])
        .await
        .unwrap();

    let record = app
        .submit_job(NewJob::new("demo", "transcription"))
        .await
        .unwrap();
    app.drain(DRAIN).await.unwrap();

    let job = app.service.get_job(&record.id).await.unwrap();
    assert_eq!(job.result.get("text"), Some(&json!("from p2")));
    assert!(!app.registry.usage_summary().await.unwrap().contains_key("p1"));

    app.shutdown().await;
}

#[tokio::test]
async fn test_non_retryable_chain_failure_fails_job() {
    let dir = TempDir::new().unwrap();
    let rejecting = provider_server(422, json!({"error": "unsupported language"})).await;

    let app = app(&dir).await;
    app.registry
        .register_provider(ProviderRecord::new("p1", ["transcription"]).with_endpoint(rejecting.uri()))
        .await
        .unwrap();

    let record = app
        .submit_job(NewJob::new("demo", "transcription"))
        .await
        .unwrap();
    app.drain(DRAIN).await.unwrap();

    let job = app.service.get_job(&record.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 0);
    assert!(job.error_message.unwrap().contains("p1"));

    app.shutdown().await;
}

#[tokio::test]
async fn test_retryable_chain_failure_is_retried_until_exhausted() {
    let dir = TempDir::new().unwrap();
    let flapping = provider_server(503, json!({"error": "overloaded"})).await;

    let app = app(&dir).await;
    app.registry
        .register_provider(ProviderRecord::new("p1", ["transcription"]).with_endpoint(flapping.uri()))
        .await
        .unwrap();

    let record = app
        .submit_job(NewJob::new("demo", "transcription").with_max_attempts(2))
        .await
        .unwrap();
    app.drain(DRAIN).await.unwrap();

    let job = app.service.get_job(&record.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 1);
    assert_eq!(app.registry.usage_summary().await.unwrap()["p1"].failures, 2);

    app.shutdown().await;
}
