//! Job records tracked by the orchestration core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Structured JSON object used for payloads, results and log details.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker (initially, or again after a retryable failure)
    #[default]
    Queued,
    /// Owned by exactly one worker
    Running,
    /// Handler returned successfully
    Completed,
    /// Fatal failure or attempts exhausted
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a job's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub details: JsonMap,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, details: JsonMap) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        }
    }
}

/// Rejected progress update: percentages never move backwards within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("progress {requested} is below current progress {current}")]
pub struct ProgressRegression {
    pub current: f64,
    pub requested: f64,
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Owning project
    pub project_id: String,

    /// Key into the handler registry
    pub job_type: String,

    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0.0-100.0)
    #[serde(default)]
    pub progress: f64,

    /// Handler-interpreted input
    #[serde(default)]
    pub payload: JsonMap,

    /// Handler output, populated on success
    #[serde(default)]
    pub result: JsonMap,

    /// Error message (if failed, or the last error before a retry)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Number of retry re-enqueues so far
    #[serde(default)]
    pub attempt: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before a retry, in seconds
    #[serde(default)]
    pub retry_delay: f64,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    3
}

impl JobRecord {
    /// Create a new queued job.
    pub fn new(
        project_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: JsonMap,
        max_attempts: u32,
        retry_delay: f64,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::new(),
            project_id: project_id.into(),
            job_type: job_type.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            payload,
            result: JsonMap::new(),
            error_message: None,
            attempt: 0,
            max_attempts,
            retry_delay,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a failed attempt may be followed by another one.
    pub fn can_retry(&self) -> bool {
        self.attempt.saturating_add(1) < self.max_attempts
    }

    /// Bump the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Transition QUEUED -> RUNNING for a fresh attempt.
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.progress = 0.0;
        self.started_at = Some(Utc::now());
        self.touch();
    }

    /// Transition RUNNING -> COMPLETED, merging the handler output into `result`.
    pub fn complete(&mut self, output: JsonMap) {
        self.result.extend(output);
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.error_message = None;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// Transition RUNNING -> FAILED.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// Transition RUNNING -> QUEUED for the next attempt.
    pub fn requeue(&mut self, error: impl Into<String>) {
        self.attempt += 1;
        self.progress = 0.0;
        self.status = JobStatus::Queued;
        self.error_message = Some(error.into());
        self.touch();
    }

    /// Record a progress percentage, clamped to [0, 100].
    ///
    /// Returns the stored value, or the regression if it is below the current progress.
    pub fn advance_progress(&mut self, percent: f64) -> Result<f64, ProgressRegression> {
        let clamped = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };

        if clamped < self.progress {
            return Err(ProgressRegression {
                current: self.progress,
                requested: clamped,
            });
        }

        self.progress = clamped;
        self.touch();
        Ok(clamped)
    }

    /// Append a log entry.
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>, details: JsonMap) {
        self.logs.push(LogEntry::new(level, message, details));
        self.touch();
    }
}
