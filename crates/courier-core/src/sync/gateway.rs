//! Retrying gateway in front of settings storage.
//!
//! Single-row reads and writes go through [`RetryPolicy`]. Multi-row writes
//! and observation never retry: lock contention surfaces on first sight as
//! `ConcurrentModification` or `TemporarilyUnavailable` respectively.

use std::sync::Arc;

use tokio::sync::watch;

use super::retry::{without_retry, RetryPolicy};
use crate::db::StorageFault;
use crate::error::StorageError;
use crate::models::{SettingKey, SettingRow};

/// Raw settings storage. Implementations report faults without retrying.
#[allow(async_fn_in_trait)]
pub trait SettingsDao {
    async fn get(&self, user_id: &str, key: SettingKey) -> Result<Option<SettingRow>, StorageFault>;

    async fn list(&self, user_id: &str) -> Result<Vec<SettingRow>, StorageFault>;

    async fn list_unsynced(&self, user_id: &str) -> Result<Vec<SettingRow>, StorageFault>;

    async fn upsert(&self, row: &SettingRow) -> Result<(), StorageFault>;

    /// Write every row in one transaction
    async fn upsert_all(&self, rows: &[SettingRow]) -> Result<(), StorageFault>;

    /// Write `row` only if the stored `local_version` equals `expected`
    /// (`None`: only if no row exists). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        row: &SettingRow,
        expected: Option<i64>,
    ) -> Result<bool, StorageFault>;
}

#[derive(Clone)]
pub struct SettingsGateway<D> {
    dao: D,
    retry: RetryPolicy,
    revision: Arc<watch::Sender<u64>>,
}

impl<D: SettingsDao> SettingsGateway<D> {
    pub fn new(dao: D) -> Self {
        Self::with_policy(dao, RetryPolicy::default())
    }

    pub fn with_policy(dao: D, retry: RetryPolicy) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            dao,
            retry,
            revision: Arc::new(revision),
        }
    }

    pub const fn dao(&self) -> &D {
        &self.dao
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn get(
        &self,
        user_id: &str,
        key: SettingKey,
    ) -> Result<Option<SettingRow>, StorageError> {
        let dao = &self.dao;
        self.retry
            .run("settings.get", move || dao.get(user_id, key))
            .await
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<SettingRow>, StorageError> {
        let dao = &self.dao;
        self.retry
            .run("settings.list", move || dao.list(user_id))
            .await
    }

    /// Rows with `local_version > synced_version`: the batch-sync work queue
    pub async fn get_unsynced(&self, user_id: &str) -> Result<Vec<SettingRow>, StorageError> {
        let dao = &self.dao;
        self.retry
            .run("settings.list_unsynced", move || dao.list_unsynced(user_id))
            .await
    }

    pub async fn upsert(&self, row: &SettingRow) -> Result<(), StorageError> {
        let row = &normalize(row);
        let dao = &self.dao;
        self.retry
            .run("settings.upsert", move || dao.upsert(row))
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn compare_and_set(
        &self,
        row: &SettingRow,
        expected: Option<i64>,
    ) -> Result<bool, StorageError> {
        let row = &normalize(row);
        let dao = &self.dao;
        let written = self
            .retry
            .run("settings.compare_and_set", move || {
                dao.compare_and_set(row, expected)
            })
            .await?;
        if written {
            self.notify();
        }
        Ok(written)
    }

    /// Multi-row write, attempted exactly once.
    pub async fn upsert_all(&self, rows: &[SettingRow]) -> Result<(), StorageError> {
        let rows: Vec<SettingRow> = rows.iter().map(normalize).collect();
        self.dao.upsert_all(&rows).await.map_err(|fault| {
            without_retry(
                "settings.upsert_all",
                fault,
                StorageError::ConcurrentModification,
            )
        })?;
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl<D: SettingsDao + Clone> SettingsGateway<D> {
    /// Watch a user's settings: one snapshot right away, then one after each
    /// committed write through this gateway or its clones.
    pub fn observe(&self, user_id: impl Into<String>) -> SettingsObserver<D> {
        SettingsObserver {
            dao: self.dao.clone(),
            user_id: user_id.into(),
            revision: self.revision.subscribe(),
            primed: false,
        }
    }
}

fn normalize(row: &SettingRow) -> SettingRow {
    debug_assert!(
        row.local_version >= row.synced_version,
        "local_version must never fall behind synced_version"
    );
    row.clone().with_derived_status()
}

pub struct SettingsObserver<D> {
    dao: D,
    user_id: String,
    revision: watch::Receiver<u64>,
    primed: bool,
}

impl<D: SettingsDao> SettingsObserver<D> {
    /// Next snapshot, or `None` once every gateway clone is dropped.
    ///
    /// Reads are not retried; lock contention yields `TemporarilyUnavailable`.
    pub async fn next(&mut self) -> Option<Result<Vec<SettingRow>, StorageError>> {
        if self.primed {
            self.revision.changed().await.ok()?;
        } else {
            self.primed = true;
            self.revision.mark_unchanged();
        }

        Some(self.dao.list(&self.user_id).await.map_err(|fault| {
            without_retry("settings.observe", fault, StorageError::TemporarilyUnavailable)
        }))
    }
}
