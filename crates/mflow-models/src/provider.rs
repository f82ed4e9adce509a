//! Provider configuration, preference overrides and usage ledger.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

/// An upstream AI/processing backend that handlers can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Provider ID (e.g. "openai", "deepgram")
    pub id: String,

    /// Task names this provider can serve
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Whether credentials are present
    #[serde(default)]
    pub configured: bool,

    /// Availability switch; disabled providers are never selected
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit rank among providers not named by any override (lower first)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_rank: Option<u32>,

    /// Base URL for HTTP task calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Flat cost charged per successful call when the call reports none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_request: Option<f64>,
}

impl ProviderRecord {
    /// Create an enabled, configured provider serving the given tasks.
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            configured: true,
            enabled: true,
            priority_rank: None,
            endpoint: None,
            cost_per_request: None,
        }
    }

    /// Set the explicit priority rank.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.priority_rank = Some(rank);
        self
    }

    /// Set the HTTP endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Mark the provider as missing credentials.
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn can_serve(&self, task: &str) -> bool {
        self.capabilities.contains(task)
    }

    /// Configured and enabled.
    pub fn is_usable(&self) -> bool {
        self.configured && self.enabled
    }
}

/// Per-provider usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Every attempted call, successful or not
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub successes: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for ProviderUsage {
    fn default() -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            cost: 0.0,
            tokens: 0,
            currency: default_currency(),
            last_used: None,
            last_error: None,
        }
    }
}

impl ProviderUsage {
    /// Fold one call outcome into the ledger.
    pub fn apply(&mut self, delta: &UsageDelta) {
        self.requests += 1;
        self.last_used = Some(delta.at);
        match &delta.error {
            None => {
                self.successes += 1;
                self.cost += delta.cost;
                self.tokens += delta.tokens;
            }
            Some(error) => {
                self.failures += 1;
                self.last_error = Some(error.clone());
            }
        }
    }
}

/// Outcome of a single provider call, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDelta {
    pub cost: f64,
    pub tokens: u64,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl UsageDelta {
    pub fn success(cost: f64, tokens: u64) -> Self {
        Self {
            cost,
            tokens,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            cost: 0.0,
            tokens: 0,
            error: Some(error.into()),
            at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Provider preferences of a single project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectOverrides {
    /// Ordered provider IDs for every task of the project
    #[serde(default)]
    pub providers: Vec<String>,
    /// Ordered provider IDs per task, more specific than `providers`
    #[serde(default)]
    pub tasks: BTreeMap<String, Vec<String>>,
}

impl ProjectOverrides {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.tasks.values().all(Vec::is_empty)
    }
}

/// Durable document holding provider configuration and usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Providers in registration order
    #[serde(default)]
    pub providers: Vec<ProviderRecord>,
    /// Global ordered priority
    #[serde(default)]
    pub priority: Vec<String>,
    /// Global per-task overrides
    #[serde(default)]
    pub task_overrides: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub usage: BTreeMap<String, ProviderUsage>,
}

/// Durable document holding per-project provider preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPreferences {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectOverrides>,
}

/// Combined view over both provider documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderState {
    pub providers: Vec<ProviderRecord>,
    pub priority: Vec<String>,
    pub task_overrides: BTreeMap<String, Vec<String>>,
    pub project_overrides: BTreeMap<String, ProjectOverrides>,
    pub usage: BTreeMap<String, ProviderUsage>,
}

impl ProviderState {
    pub fn from_parts(settings: ProviderSettings, preferences: ProviderPreferences) -> Self {
        Self {
            providers: settings.providers,
            priority: settings.priority,
            task_overrides: settings.task_overrides,
            project_overrides: preferences.projects,
            usage: settings.usage,
        }
    }

    pub fn into_parts(self) -> (ProviderSettings, ProviderPreferences) {
        (
            ProviderSettings {
                providers: self.providers,
                priority: self.priority,
                task_overrides: self.task_overrides,
                usage: self.usage,
            },
            ProviderPreferences {
                projects: self.project_overrides,
            },
        )
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderRecord> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Insert or replace a provider, keeping its original registration slot.
    pub fn upsert_provider(&mut self, record: ProviderRecord) {
        match self.providers.iter_mut().find(|p| p.id == record.id) {
            Some(existing) => *existing = record,
            None => self.providers.push(record),
        }
    }

    pub fn record_usage(&mut self, provider_id: &str, delta: &UsageDelta) {
        self.usage
            .entry(provider_id.to_string())
            .or_default()
            .apply(delta);
    }
}
