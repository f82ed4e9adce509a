//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mflow_providers::HttpClientConfig;
use mflow_queue::QueueConfig;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding jobs.json, providers.json and preferences.json
    pub data_dir: PathBuf,
    /// Worker pool and backlog settings
    pub queue: QueueConfig,
    /// Retry defaults and backoff
    pub retry: RetryPolicy,
    /// Provider HTTP client settings
    pub http: HttpClientConfig,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus exporter listen address; exporter disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            http: HttpClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("MFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            queue: QueueConfig::from_env(),
            retry: RetryPolicy::from_env(),
            http: HttpClientConfig::from_env(),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Config rooted at `data_dir` with every other setting at its default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}
