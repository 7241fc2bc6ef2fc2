//! The task that keeps the chat replica in step with the server.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::applier::DeltaApplier;
use super::poller::DeltaPoller;
use crate::clock::{Clock, SystemClock};
use crate::error::SyncError;
use crate::remote::ChatDeltaSource;
use crate::services::LocalStore;

pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Totals from a one-shot drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub batches: usize,
    pub changes: usize,
    pub cursor: Option<DateTime<Utc>>,
}

/// Polls, applies and advances the cursor, one batch at a time.
///
/// Each subscription starts from the persisted cursor, so a batch that
/// failed to apply is fetched again after re-subscribing.
pub struct ChatSyncPipeline<R, C = SystemClock> {
    poller: DeltaPoller<R>,
    applier: DeltaApplier<C>,
    store: LocalStore,
    resubscribe_delay: Duration,
}

impl<R: ChatDeltaSource, C: Clock> ChatSyncPipeline<R, C> {
    pub const fn new(poller: DeltaPoller<R>, applier: DeltaApplier<C>, store: LocalStore) -> Self {
        Self {
            poller,
            applier,
            store,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    #[must_use]
    pub const fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Run until `cancel` fires or storage fails permanently.
    ///
    /// Remote failures, transient storage failures and rejected batches are
    /// logged and followed by a fresh subscription after the resubscribe delay.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        tracing::info!("Chat sync pipeline started");
        while !cancel.is_cancelled() {
            let failure = match self.store.last_sync_timestamp().await {
                Ok(cursor) => self.follow(cursor, &cancel).await,
                Err(error) => Some(SyncError::Storage(error)),
            };

            match failure {
                None if cancel.is_cancelled() => break,
                None => tracing::warn!("Delta subscription ended unexpectedly"),
                Some(SyncError::Storage(error)) if !error.is_transient() => {
                    tracing::error!(%error, "Chat sync stopped on storage failure");
                    return Err(error.into());
                }
                Some(error) => tracing::warn!(
                    %error,
                    delay_ms = self.resubscribe_delay.as_millis(),
                    "Chat sync interrupted, resubscribing"
                ),
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }
        tracing::info!("Chat sync pipeline stopped");
        Ok(())
    }

    /// Follow one subscription until it fails or is cancelled.
    async fn follow(
        &self,
        cursor: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Option<SyncError> {
        tracing::debug!(cursor = ?cursor, "Subscribing to chat deltas");
        let mut subscription = self.poller.stream(cursor);
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return None,
                next = subscription.recv() => next,
            };
            match next? {
                Ok(batch) => {
                    if let Err(error) = self.applier.apply_list(&batch).await {
                        return Some(error);
                    }
                }
                Err(error) => return Some(error),
            }
        }
    }

    /// Fetch and apply pages until the server reports no more changes.
    pub async fn catch_up(&self) -> Result<CatchUpReport, SyncError> {
        let mut report = CatchUpReport {
            cursor: self.store.last_sync_timestamp().await?,
            ..CatchUpReport::default()
        };
        let mut subscription = self.poller.stream(report.cursor);

        while let Some(next) = subscription.recv().await {
            let batch = next?;
            self.applier.apply_list(&batch).await?;
            report.batches += 1;
            report.changes += batch.changes.len();
            report.cursor = Some(batch.to_timestamp);
            if !batch.has_more_changes {
                break;
            }
        }

        tracing::info!(
            batches = report.batches,
            changes = report.changes,
            "Chat replica caught up"
        );
        Ok(report)
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::models::{ChatDelta, ChatId, ChatListDelta, ChatMetadata, Message, ParticipantId};
    use crate::sync::poller::tests::{page, ScriptedSource};
    use crate::sync::poller::PollIntervals;
    use crate::util::from_millis;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn pipeline(
        source: &Arc<ScriptedSource>,
    ) -> (LocalStore, ChatSyncPipeline<ScriptedSource, ManualClock>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let pipeline = ChatSyncPipeline::new(
            DeltaPoller::new(Arc::clone(source), PollIntervals::default()),
            DeltaApplier::with_clock(store.clone(), ManualClock::new(from_millis(0))),
            store.clone(),
        )
        .with_resubscribe_delay(Duration::from_secs(1));
        (store, pipeline)
    }

    fn created(chat_id: ChatId, messages: usize, at: i64) -> ChatDelta {
        ChatDelta::Created {
            chat_id,
            metadata: ChatMetadata::named("general"),
            initial_messages: (0..messages)
                .map(|n| {
                    Message::new(
                        chat_id,
                        ParticipantId::new(),
                        format!("hello {n}"),
                        from_millis(at),
                    )
                })
                .collect(),
            timestamp: from_millis(at),
        }
    }

    fn with_changes(mut batch: ChatListDelta, changes: Vec<ChatDelta>) -> ChatListDelta {
        batch.changes = changes;
        batch
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_client_full_sync() {
        let chat_id = ChatId::new();
        let source = ScriptedSource::new([Ok(with_changes(
            page(None, 10, false),
            vec![created(chat_id, 2, 5)],
        ))]);
        let (store, pipeline) = pipeline(&source).await;

        let report = pipeline.catch_up().await.unwrap();

        assert_eq!(
            report,
            CatchUpReport {
                batches: 1,
                changes: 1,
                cursor: Some(from_millis(10)),
            }
        );
        assert!(store.get_chat(chat_id).await.unwrap().is_some());
        assert_eq!(store.list_messages(chat_id).await.unwrap().len(), 2);
        assert_eq!(store.last_sync_timestamp().await.unwrap(), Some(from_millis(10)));
        assert_eq!(source.requests(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_follows_pages_to_the_last_cursor() {
        let source = ScriptedSource::new([
            Ok(page(None, 10, true)),
            Ok(page(Some(10), 20, true)),
            Ok(page(Some(20), 30, false)),
        ]);
        let (store, pipeline) = pipeline(&source).await;

        let report = pipeline.catch_up().await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(store.last_sync_timestamp().await.unwrap(), Some(from_millis(30)));
        assert_eq!(
            source.requests(),
            vec![None, Some(from_millis(10)), Some(from_millis(20))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_failure_keeps_committed_cursor() {
        let source = ScriptedSource::new([
            Ok(page(None, 10, true)),
            Err(RemoteError::ServerUnreachable),
        ]);
        let (store, pipeline) = pipeline(&source).await;

        let error = pipeline.catch_up().await.unwrap_err();

        assert_eq!(error, SyncError::Remote(RemoteError::ServerUnreachable));
        assert_eq!(store.last_sync_timestamp().await.unwrap(), Some(from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resubscribes_from_persisted_cursor() {
        let source = ScriptedSource::new([
            Ok(page(None, 10, false)),
            Err(RemoteError::Timeout),
            Ok(page(Some(10), 20, false)),
        ]);
        let (store, pipeline) = pipeline(&source).await;
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(store.last_sync_timestamp().await.unwrap(), Some(from_millis(20)));
        assert_eq!(
            source.requests(),
            vec![
                None,
                Some(from_millis(10)),
                Some(from_millis(10)),
                Some(from_millis(20)),
            ]
        );

        cancel.cancel();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_batch_is_refetched() {
        let bad = with_changes(
            page(None, 10, false),
            vec![created(ChatId::new(), 0, 8), created(ChatId::new(), 0, 3)],
        );
        let good_chat = ChatId::new();
        let good = with_changes(page(None, 10, false), vec![created(good_chat, 0, 3)]);
        let source = ScriptedSource::new([Ok(bad), Ok(good)]);
        let (store, pipeline) = pipeline(&source).await;
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), Ok(()));

        assert_eq!(source.requests()[..2], [None, None]);
        let ids: Vec<ChatId> = store
            .list_chats()
            .await
            .unwrap()
            .into_iter()
            .map(|chat| chat.id)
            .collect();
        assert_eq!(ids, vec![good_chat]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_batch() {
        let source = ScriptedSource::new([]);
        let (store, pipeline) = pipeline(&source).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(pipeline.run(cancel).await, Ok(()));
        assert_eq!(store.last_sync_timestamp().await.unwrap(), None);
    }
}
