//! Transactional application of chat deltas to the local replica.

use rusqlite::Transaction;

use crate::clock::{Clock, SystemClock};
use crate::db::{SqliteChatRepository, StorageFault};
use crate::error::{StorageError, SyncError};
use crate::models::{ChatDelta, ChatListDelta};
use crate::services::LocalStore;

use super::retry::without_retry;

/// Applies deltas in list order, one transaction per call.
///
/// Nothing here retries: a failed batch is rolled back whole and the caller
/// re-fetches it from the unchanged cursor.
#[derive(Clone)]
pub struct DeltaApplier<C = SystemClock> {
    store: LocalStore,
    clock: C,
}

impl DeltaApplier<SystemClock> {
    pub const fn new(store: LocalStore) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<C: Clock> DeltaApplier<C> {
    pub const fn with_clock(store: LocalStore, clock: C) -> Self {
        Self { store, clock }
    }

    pub async fn apply(&self, delta: &ChatDelta) -> Result<(), StorageError> {
        self.apply_batch(std::slice::from_ref(delta)).await
    }

    /// Apply every delta or none of them. Does not touch the cursor.
    pub async fn apply_batch(&self, deltas: &[ChatDelta]) -> Result<(), StorageError> {
        let deltas = deltas.to_vec();
        self.store
            .write_transaction(move |tx| apply_all(tx, &deltas))
            .await
            .map_err(|fault| surface("deltas.apply_batch", fault))
    }

    /// Apply a fetched page and advance the persisted cursor to its
    /// `to_timestamp` in the same transaction.
    ///
    /// A page without `from_timestamp` first discards the whole replica.
    pub async fn apply_list(&self, batch: &ChatListDelta) -> Result<(), SyncError> {
        batch.validate()?;
        let now = self.clock.now();
        let page = batch.clone();

        self.store
            .write_transaction(move |tx| {
                let repo = SqliteChatRepository::new(tx);
                if page.is_full_resync() {
                    tracing::info!("Full resync requested, clearing chat replica");
                    repo.clear_all()?;
                }
                apply_all(tx, &page.changes)?;
                repo.set_last_sync_timestamp(page.to_timestamp, now)
            })
            .await
            .map_err(|fault| surface("deltas.apply_list", fault))?;

        tracing::debug!(
            changes = batch.changes.len(),
            cursor = %batch.to_timestamp,
            "Committed delta batch"
        );
        Ok(())
    }
}

fn surface(operation: &str, fault: StorageFault) -> StorageError {
    without_retry(operation, fault, StorageError::ConcurrentModification)
}

fn apply_all(tx: &Transaction<'_>, deltas: &[ChatDelta]) -> rusqlite::Result<()> {
    let repo = SqliteChatRepository::new(tx);
    for delta in deltas {
        apply_one(&repo, delta)?;
    }
    Ok(())
}

fn apply_one(repo: &SqliteChatRepository<'_>, delta: &ChatDelta) -> rusqlite::Result<()> {
    match delta {
        ChatDelta::Created {
            chat_id,
            metadata,
            initial_messages,
            timestamp,
        } => {
            repo.upsert_chat(*chat_id, metadata, *timestamp)?;
            for message in initial_messages {
                repo.upsert_message(message)?;
            }
            tracing::debug!(chat_id = %chat_id, messages = initial_messages.len(), "Chat created");
        }
        ChatDelta::Updated {
            chat_id,
            metadata,
            messages_to_add,
            messages_to_delete,
            timestamp,
        } => {
            if !repo.chat_exists(*chat_id)? {
                tracing::debug!(chat_id = %chat_id, "Ignoring update for unknown chat");
                return Ok(());
            }
            repo.upsert_chat(*chat_id, metadata, *timestamp)?;
            for message in messages_to_add {
                repo.upsert_message(message)?;
            }
            for message_id in messages_to_delete {
                repo.delete_message(*chat_id, *message_id)?;
            }
            tracing::debug!(
                chat_id = %chat_id,
                added = messages_to_add.len(),
                deleted = messages_to_delete.len(),
                "Chat updated"
            );
        }
        ChatDelta::Deleted { chat_id, .. } => {
            let existed = repo.delete_chat(*chat_id)?;
            tracing::debug!(chat_id = %chat_id, existed, "Chat deleted");
        }
    }
    Ok(())
}
