//! Shared local store used by the sync pipeline, the settings engine and clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tokio::sync::Mutex;

use crate::db::{Database, SqliteChatRepository, SqliteSettingsRepository, StorageFault};
use crate::error::StorageError;
use crate::models::{Chat, ChatId, Message, MessageId, SettingKey, SettingRow};
use crate::sync::{RetryPolicy, SettingsDao};
use crate::Result;

/// Thread-safe handle to the local replica.
///
/// Every SQLite call runs on tokio's blocking pool, so slow disks never stall
/// async workers. Reads are retried on lock contention. Writes happen only
/// through the delta applier's batch transactions and the single-row settings
/// and message paths.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating parent directories.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "Opened local store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            retry: RetryPolicy::default(),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `work` against the database on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> std::result::Result<T, StorageFault>
    where
        F: FnOnce(&mut Database) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || work(&mut db.blocking_lock())).await {
            Ok(result) => result.map_err(StorageFault::from),
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(error) => Err(StorageFault::Other(format!("storage task cancelled: {error}"))),
        }
    }

    async fn read<T, F>(&self, operation: &str, query: F) -> std::result::Result<T, StorageError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let query = Arc::new(query);
        self.retry
            .run(operation, || {
                let query = Arc::clone(&query);
                self.blocking(move |db| query(db.connection()))
            })
            .await
    }

    /// Run `work` inside one transaction, committing only if it succeeds.
    ///
    /// Dropping the uncommitted transaction rolls it back.
    pub(crate) async fn write_transaction<T, F>(
        &self,
        work: F,
    ) -> std::result::Result<T, StorageFault>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |db| {
            let tx = db.connection_mut().transaction()?;
            let value = work(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    pub async fn get_chat(
        &self,
        chat_id: ChatId,
    ) -> std::result::Result<Option<Chat>, StorageError> {
        self.read("chats.get", move |conn| {
            SqliteChatRepository::new(conn).get_chat(chat_id)
        })
        .await
    }

    pub async fn list_chats(&self) -> std::result::Result<Vec<Chat>, StorageError> {
        self.read("chats.list", |conn| SqliteChatRepository::new(conn).list_chats())
            .await
    }

    pub async fn list_messages(
        &self,
        chat_id: ChatId,
    ) -> std::result::Result<Vec<Message>, StorageError> {
        self.read("messages.list", move |conn| {
            SqliteChatRepository::new(conn).list_messages(chat_id)
        })
        .await
    }

    pub async fn get_message(
        &self,
        message_id: MessageId,
    ) -> std::result::Result<Option<Message>, StorageError> {
        self.read("messages.get", move |conn| {
            SqliteChatRepository::new(conn).get_message(message_id)
        })
        .await
    }

    /// The persisted delta cursor; `None` until the first batch commits.
    pub async fn last_sync_timestamp(
        &self,
    ) -> std::result::Result<Option<DateTime<Utc>>, StorageError> {
        self.read("cursor.get", |conn| {
            SqliteChatRepository::new(conn).last_sync_timestamp()
        })
        .await
    }

    /// Single-row message write, retried like any other single-row operation.
    pub(crate) async fn save_message(
        &self,
        message: &Message,
    ) -> std::result::Result<(), StorageError> {
        self.retry
            .run("messages.upsert", || {
                let message = message.clone();
                self.blocking(move |db| {
                    SqliteChatRepository::new(db.connection()).upsert_message(&message)
                })
            })
            .await
    }
}

impl SettingsDao for LocalStore {
    async fn get(
        &self,
        user_id: &str,
        key: SettingKey,
    ) -> std::result::Result<Option<SettingRow>, StorageFault> {
        let user_id = user_id.to_string();
        self.blocking(move |db| SqliteSettingsRepository::new(db.connection()).get(&user_id, key))
            .await
    }

    async fn list(&self, user_id: &str) -> std::result::Result<Vec<SettingRow>, StorageFault> {
        let user_id = user_id.to_string();
        self.blocking(move |db| SqliteSettingsRepository::new(db.connection()).list(&user_id))
            .await
    }

    async fn list_unsynced(
        &self,
        user_id: &str,
    ) -> std::result::Result<Vec<SettingRow>, StorageFault> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            SqliteSettingsRepository::new(db.connection()).list_unsynced(&user_id)
        })
        .await
    }

    async fn upsert(&self, row: &SettingRow) -> std::result::Result<(), StorageFault> {
        let row = row.clone();
        self.blocking(move |db| SqliteSettingsRepository::new(db.connection()).upsert(&row))
            .await
    }

    async fn upsert_all(&self, rows: &[SettingRow]) -> std::result::Result<(), StorageFault> {
        let rows = rows.to_vec();
        self.write_transaction(move |tx| {
            let repo = SqliteSettingsRepository::new(tx);
            rows.iter().try_for_each(|row| repo.upsert(row))
        })
        .await
    }

    async fn compare_and_set(
        &self,
        row: &SettingRow,
        expected: Option<i64>,
    ) -> std::result::Result<bool, StorageFault> {
        let row = row.clone();
        self.blocking(move |db| {
            SqliteSettingsRepository::new(db.connection()).compare_and_set(&row, expected)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMetadata, ParticipantId, SyncStatus};
    use crate::util::from_millis;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_path_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("courier.db");

        let store = LocalStore::open_path(&db_path).await.unwrap();

        assert!(db_path.exists());
        assert_eq!(store.db_path(), Some(db_path.as_path()));
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let chat_id = ChatId::new();

        let result: std::result::Result<(), StorageFault> = store
            .write_transaction(move |tx| {
                SqliteChatRepository::new(tx).upsert_chat(
                    chat_id,
                    &ChatMetadata::named("draft"),
                    from_millis(1),
                )?;
                Err(rusqlite::Error::InvalidQuery)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.get_chat(chat_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_message_requires_existing_chat() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let message = Message::new(ChatId::new(), ParticipantId::new(), "orphan", from_millis(1));

        let error = store.save_message(&message).await.unwrap_err();

        assert!(matches!(error, StorageError::Unknown(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_storage_runs_off_async_workers() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let busy = store.clone();
        let held = tokio::task::spawn_blocking(move || {
            let _db = busy.db.blocking_lock();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let reader = store.clone();
        let read = tokio::spawn(async move { reader.list_chats().await });
        let timer = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            tokio::time::sleep(std::time::Duration::from_millis(10)),
        )
        .await;

        assert!(timer.is_ok(), "async timer starved while storage was busy");
        assert_eq!(read.await.unwrap().unwrap(), Vec::new());
        held.await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_all_is_one_transaction() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let good = SettingRow::materialized_default("u1", SettingKey::UiLanguage, from_millis(1));
        let mut bad =
            SettingRow::materialized_default("u1", SettingKey::Notifications, from_millis(1));
        bad.synced_version = 5;
        bad.sync_status = SyncStatus::Synced;

        assert!(store.upsert_all(&[good, bad]).await.is_err());
        assert_eq!(SettingsDao::list(&store, "u1").await.unwrap(), Vec::new());
    }
}
