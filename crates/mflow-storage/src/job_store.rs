//! Durable job ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use mflow_models::{JobId, JobRecord, JobStatus};

use crate::error::{StorageError, StorageResult};
use crate::fs::{read_document, write_document};

/// Persistence contract for job records.
///
/// Implementations must make every mutation atomic with respect to readers.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new record; fails if the id is already present.
    async fn add(&self, record: &JobRecord) -> StorageResult<()>;

    /// Insert or replace a record by id.
    async fn update(&self, record: &JobRecord) -> StorageResult<()>;

    async fn get(&self, id: &JobId) -> StorageResult<Option<JobRecord>>;

    /// Atomically move a QUEUED record to RUNNING and return it.
    ///
    /// Returns `None` if the record is in any other status; a missing id is
    /// `NotFound`. At most one caller wins the claim for a given attempt.
    async fn claim(&self, id: &JobId) -> StorageResult<Option<JobRecord>>;

    /// Records of a project, newest first.
    async fn list_by_project(
        &self,
        project_id: &str,
        status: Option<JobStatus>,
    ) -> StorageResult<Vec<JobRecord>>;

    /// Records in a given status, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> StorageResult<Vec<JobRecord>>;

    /// Administrative delete. Returns whether a record was removed.
    async fn delete(&self, id: &JobId) -> StorageResult<bool>;

    async fn all(&self) -> StorageResult<Vec<JobRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobLedger {
    #[serde(default)]
    jobs: BTreeMap<JobId, JobRecord>,
}

/// Job ledger kept as a single JSON document.
///
/// All mutations are load-modify-replace under one lock per instance.
pub struct JsonJobStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/jobs.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("jobs.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<JobLedger> {
        read_document(&self.path).await
    }

    async fn mutate<R>(&self, op: impl FnOnce(&mut JobLedger) -> StorageResult<R>) -> StorageResult<R> {
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.load().await?;
        let out = op(&mut ledger)?;
        write_document(&self.path, &ledger).await?;
        Ok(out)
    }
}

#[async_trait]
impl JobRepository for JsonJobStore {
    async fn add(&self, record: &JobRecord) -> StorageResult<()> {
        self.mutate(|ledger| {
            if ledger.jobs.contains_key(&record.id) {
                return Err(StorageError::already_exists(record.id.as_str()));
            }
            ledger.jobs.insert(record.id.clone(), record.clone());
            Ok(())
        })
        .await?;

        debug!(job_id = %record.id, "Job added to ledger");
        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> StorageResult<()> {
        self.mutate(|ledger| {
            ledger.jobs.insert(record.id.clone(), record.clone());
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &JobId) -> StorageResult<Option<JobRecord>> {
        let mut ledger = self.load().await?;
        Ok(ledger.jobs.remove(id))
    }

    async fn claim(&self, id: &JobId) -> StorageResult<Option<JobRecord>> {
        let claimed = self
            .mutate(|ledger| {
                let record = ledger
                    .jobs
                    .get_mut(id)
                    .ok_or_else(|| StorageError::not_found(id.as_str()))?;
                if record.status != JobStatus::Queued {
                    return Ok(None);
                }
                record.start();
                Ok(Some(record.clone()))
            })
            .await?;

        if claimed.is_some() {
            debug!(job_id = %id, "Job claimed");
        }
        Ok(claimed)
    }

    async fn list_by_project(
        &self,
        project_id: &str,
        status: Option<JobStatus>,
    ) -> StorageResult<Vec<JobRecord>> {
        let ledger = self.load().await?;
        let mut jobs: Vec<JobRecord> = ledger
            .jobs
            .into_values()
            .filter(|job| job.project_id == project_id)
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_by_status(&self, status: JobStatus) -> StorageResult<Vec<JobRecord>> {
        let ledger = self.load().await?;
        let mut jobs: Vec<JobRecord> = ledger
            .jobs
            .into_values()
            .filter(|job| job.status == status)
            .collect();

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> StorageResult<bool> {
        let removed = self.mutate(|ledger| Ok(ledger.jobs.remove(id).is_some())).await?;

        if removed {
            debug!(job_id = %id, "Job deleted from ledger");
        }
        Ok(removed)
    }

    async fn all(&self) -> StorageResult<Vec<JobRecord>> {
        let ledger = self.load().await?;
        Ok(ledger.jobs.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use mflow_models::JsonMap;
    use tempfile::TempDir;

    fn job(project: &str) -> JobRecord {
        JobRecord::new(project, "stub", JsonMap::new(), 3, 0.0)
    }

    #[tokio::test]
    async fn test_add_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonJobStore::in_dir(dir.path());

        let record = job("demo");
        store.add(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap();
        assert_eq!(loaded, Some(record));
        assert_eq!(store.get(&JobId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonJobStore::in_dir(dir.path()));
        let record = job("demo");
        store.add(&record).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = record.id.clone();
                tokio::spawn(async move { store.claim(&id).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap() {
                assert_eq!(claimed.status, JobStatus::Running);
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(&record.id).await.unwrap().unwrap().status, JobStatus::Running);

        let missing = store.claim(&JobId::new()).await.unwrap_err();
        assert!(matches!(missing, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let store = JsonJobStore::in_dir(dir.path());

        let record = job("demo");
        store.add(&record).await.unwrap();

        let err = store.add(&record).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_upserts() {
        let dir = TempDir::new().unwrap();
        let store = JsonJobStore::in_dir(dir.path());

        let mut record = job("demo");
        store.update(&record).await.unwrap();

        record.start();
        store.update(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_project_orders_and_filters() {
        let dir = TempDir::new().unwrap();
        let store = JsonJobStore::in_dir(dir.path());

        let mut older = job("demo");
        older.created_at = older.created_at - Duration::seconds(10);
        let mut newer = job("demo");
        newer.start();
        let other = job("other");

        for record in [&older, &newer, &other] {
            store.add(record).await.unwrap();
        }

        let listed = store.list_by_project("demo", None).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);

        let queued = store
            .list_by_project("demo", Some(JobStatus::Queued))
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, older.id);

        assert!(store.delete(&older.id).await.unwrap());
        assert!(!store.delete(&older.id).await.unwrap());

        let listed = store.list_by_project("demo", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonJobStore::in_dir(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.add(&job("demo")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_malformed_ledger_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = JsonJobStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();

        let err = store.all().await.unwrap_err();
        assert!(err.is_malformed());
        assert!(store.add(&job("demo")).await.is_err());
    }
}
