//! HTTP task client for providers exposing a JSON task endpoint.
//!
//! A task call is `POST {endpoint}/tasks/{task}` with the job payload as the
//! body. The provider answers `{"result": {...}, "cost": 0.01, "tokens": 120}`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use mflow_models::{JsonMap, ProviderRecord};

use crate::error::ProviderFailure;
use crate::selector::ProviderResponse;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Prefix of the environment variables holding provider API keys
    pub api_key_env_prefix: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            api_key_env_prefix: "MFLOW_PROVIDER".to_string(),
        }
    }
}

impl HttpClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            request_timeout: Duration::from_secs(
                std::env::var("PROVIDER_REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            api_key_env_prefix: std::env::var("PROVIDER_API_KEY_PREFIX")
                .unwrap_or_else(|_| "MFLOW_PROVIDER".to_string()),
        }
    }

    /// Environment variable holding the API key of a provider,
    /// e.g. `MFLOW_PROVIDER_OPENAI_API_KEY`.
    pub fn api_key_var(&self, provider_id: &str) -> String {
        let id: String = provider_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}_{}_API_KEY", self.api_key_env_prefix, id)
    }
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    result: JsonMap,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    tokens: u64,
}

/// Calls provider task endpoints and classifies the outcome.
#[derive(Clone)]
pub struct HttpTaskClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpTaskClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(HttpClientConfig::from_env())
    }

    /// Run `task` on `provider` with the given payload.
    pub async fn call_task(
        &self,
        provider: &ProviderRecord,
        task: &str,
        payload: &JsonMap,
    ) -> Result<ProviderResponse<JsonMap>, ProviderFailure> {
        let endpoint = provider.endpoint.as_deref().ok_or_else(|| {
            ProviderFailure::missing_configuration(format!("provider '{}' has no endpoint", provider.id))
        })?;
        let url = format!("{}/tasks/{}", endpoint.trim_end_matches('/'), task);

        let mut request = self.client.post(&url).json(payload);
        if let Ok(key) = std::env::var(self.config.api_key_var(&provider.id)) {
            request = request.bearer_auth(key);
        }

        debug!(provider = %provider.id, task, url = %url, "Calling provider task endpoint");

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: TaskResponse = response.json().await.map_err(|e| {
            ProviderFailure::non_retryable(format!("invalid response body: {}", e))
        })?;

        let mut out = ProviderResponse::new(parsed.result).with_tokens(parsed.tokens);
        out.cost = parsed.cost;
        Ok(out)
    }
}

fn classify_transport(e: reqwest::Error) -> ProviderFailure {
    if e.is_timeout() {
        ProviderFailure::retryable(format!("request timed out: {}", e))
    } else if e.is_builder() {
        ProviderFailure::missing_configuration(format!("invalid request: {}", e))
    } else {
        ProviderFailure::retryable(format!("transport error: {}", e))
    }
}

/// Map a non-success HTTP status to a provider failure.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderFailure {
    let snippet: String = body.chars().take(200).collect();
    let msg = if snippet.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), snippet)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderFailure::MissingConfiguration(msg),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ProviderFailure::Retryable(msg),
        s if s.is_server_error() => ProviderFailure::Retryable(msg),
        _ => ProviderFailure::NonRetryable(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpTaskClient {
        HttpTaskClient::new(HttpClientConfig {
            request_timeout: Duration::from_secs(5),
            api_key_env_prefix: "MFLOW_TEST_PROVIDER".to_string(),
        })
        .unwrap()
    }

    fn payload() -> JsonMap {
        json!({"asset_id": "a1"}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ProviderFailure::MissingConfiguration(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad input"),
            ProviderFailure::NonRetryable(ref m) if m.contains("bad input")
        ));
    }

    #[test]
    fn test_api_key_var() {
        let config = HttpClientConfig::default();
        assert_eq!(config.api_key_var("open-ai"), "MFLOW_PROVIDER_OPEN_AI_API_KEY");
    }

    #[tokio::test]
    async fn test_call_task_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks/transcription"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"text": "hello"},
                "cost": 0.3,
                "tokens": 17
            })))
            .mount(&server)
            .await;

        let provider = ProviderRecord::new("p1", ["transcription"]).with_endpoint(server.uri());
        let response = client()
            .call_task(&provider, "transcription", &payload())
            .await
            .unwrap();

        assert_eq!(response.value.get("text"), Some(&json!("hello")));
        assert_eq!(response.cost, Some(0.3));
        assert_eq!(response.tokens, 17);
    }

    #[tokio::test]
    async fn test_call_task_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = ProviderRecord::new("p1", ["transcription"]).with_endpoint(server.uri());
        let failure = client()
            .call_task(&provider, "transcription", &payload())
            .await
            .unwrap_err();

        assert!(failure.is_retryable());
    }

    #[tokio::test]
    async fn test_call_task_without_endpoint() {
        let provider = ProviderRecord::new("p1", ["transcription"]);
        let failure = client()
            .call_task(&provider, "transcription", &payload())
            .await
            .unwrap_err();

        assert!(matches!(failure, ProviderFailure::MissingConfiguration(_)));
    }
}
