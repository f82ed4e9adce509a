//! Durable provider configuration, preferences and usage ledger.
//!
//! Two independent documents are kept side by side:
//! - `providers.json`: provider records, global priority, task overrides, usage
//! - `preferences.json`: per-project overrides

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use mflow_models::{
    ProjectOverrides, ProviderPreferences, ProviderRecord, ProviderSettings, ProviderState,
    ProviderUsage, UsageDelta,
};

use crate::error::StorageResult;
use crate::fs::{read_document, remove_document, write_document};

/// File-backed provider registry.
pub struct ProviderRegistry {
    settings_path: PathBuf,
    preferences_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProviderRegistry {
    pub fn new(settings_path: impl Into<PathBuf>, preferences_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            preferences_path: preferences_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Registry at `<dir>/providers.json` and `<dir>/preferences.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("providers.json"), dir.join("preferences.json"))
    }

    /// Load both documents, applying defaults for anything missing.
    pub async fn load_state(&self) -> StorageResult<ProviderState> {
        let settings: ProviderSettings = read_document(&self.settings_path).await?;
        let preferences: ProviderPreferences = read_document(&self.preferences_path).await?;
        Ok(ProviderState::from_parts(settings, preferences))
    }

    /// Replace both documents.
    pub async fn save_state(&self, state: &ProviderState) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_state(state.clone()).await
    }

    /// Drop all configuration, preferences and usage.
    pub async fn reset(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_document(&self.settings_path).await?;
        remove_document(&self.preferences_path).await?;
        info!("Provider registry reset");
        Ok(())
    }

    async fn write_state(&self, state: ProviderState) -> StorageResult<()> {
        let (settings, preferences) = state.into_parts();
        write_document(&self.settings_path, &settings).await?;
        write_document(&self.preferences_path, &preferences).await
    }

    async fn mutate<R>(&self, op: impl FnOnce(&mut ProviderState) -> R) -> StorageResult<R> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_state().await?;
        let out = op(&mut state);
        self.write_state(state).await?;
        Ok(out)
    }

    /// Register or replace a provider. New providers are appended in registration order.
    pub async fn register_provider(&self, record: ProviderRecord) -> StorageResult<()> {
        let id = record.id.clone();
        self.mutate(|state| state.upsert_provider(record)).await?;
        debug!(provider = %id, "Provider registered");
        Ok(())
    }

    /// Remove a provider record. Overrides naming it are left alone and skipped at resolution.
    pub async fn remove_provider(&self, provider_id: &str) -> StorageResult<bool> {
        self.mutate(|state| {
            let before = state.providers.len();
            state.providers.retain(|p| p.id != provider_id);
            state.providers.len() != before
        })
        .await
    }

    pub async fn providers(&self) -> StorageResult<Vec<ProviderRecord>> {
        Ok(self.load_state().await?.providers)
    }

    pub async fn set_priority(&self, provider_ids: Vec<String>) -> StorageResult<()> {
        self.mutate(|state| state.priority = provider_ids).await
    }

    pub async fn priority(&self) -> StorageResult<Vec<String>> {
        Ok(self.load_state().await?.priority)
    }

    /// Set the global override for one task. An empty list clears it.
    pub async fn set_task_override(&self, task: &str, provider_ids: Vec<String>) -> StorageResult<()> {
        self.mutate(|state| {
            if provider_ids.is_empty() {
                state.task_overrides.remove(task);
            } else {
                state.task_overrides.insert(task.to_string(), provider_ids);
            }
        })
        .await
    }

    pub async fn task_override(&self, task: &str) -> StorageResult<Vec<String>> {
        let mut state = self.load_state().await?;
        Ok(state.task_overrides.remove(task).unwrap_or_default())
    }

    /// Set the ordered provider list used for every task of a project.
    pub async fn set_project_providers(
        &self,
        project_id: &str,
        provider_ids: Vec<String>,
    ) -> StorageResult<()> {
        self.mutate(|state| {
            let entry = state
                .project_overrides
                .entry(project_id.to_string())
                .or_default();
            entry.providers = provider_ids;
            if entry.is_empty() {
                state.project_overrides.remove(project_id);
            }
        })
        .await
    }

    pub async fn project_providers(&self, project_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.project_overrides(project_id).await?.providers)
    }

    /// Set a project's override for one task. An empty list clears it.
    pub async fn set_project_task_override(
        &self,
        project_id: &str,
        task: &str,
        provider_ids: Vec<String>,
    ) -> StorageResult<()> {
        self.mutate(|state| {
            let entry = state
                .project_overrides
                .entry(project_id.to_string())
                .or_default();
            if provider_ids.is_empty() {
                entry.tasks.remove(task);
            } else {
                entry.tasks.insert(task.to_string(), provider_ids);
            }
            if entry.is_empty() {
                state.project_overrides.remove(project_id);
            }
        })
        .await
    }

    pub async fn project_overrides(&self, project_id: &str) -> StorageResult<ProjectOverrides> {
        let mut state = self.load_state().await?;
        Ok(state
            .project_overrides
            .remove(project_id)
            .unwrap_or_default())
    }

    /// Fold one call outcome into the provider's usage ledger.
    pub async fn record_usage(&self, provider_id: &str, delta: &UsageDelta) -> StorageResult<()> {
        self.mutate(|state| state.record_usage(provider_id, delta)).await
    }

    /// Read-only usage per provider.
    pub async fn usage_summary(&self) -> StorageResult<BTreeMap<String, ProviderUsage>> {
        Ok(self.load_state().await?.usage)
    }
}
