//! Cursor-driven polling of the remote chat change feed.
//!
//! Each subscription owns one background task. The task fetches a page only
//! when the subscriber asks for the next one, so at most one page is ever in
//! flight and the next fetch waits until the previous page has been handled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::models::ChatListDelta;
use crate::remote::ChatDeltaSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_CATCH_UP_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before the next request after a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Steady state, after a page without more changes
    pub poll: Duration,
    /// Catch-up mode, after a page with `has_more_changes`
    pub catch_up: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            poll: DEFAULT_POLL_INTERVAL,
            catch_up: DEFAULT_CATCH_UP_INTERVAL,
        }
    }
}

impl PollIntervals {
    const fn after(&self, batch: &ChatListDelta) -> Duration {
        if batch.has_more_changes {
            self.catch_up
        } else {
            self.poll
        }
    }
}

pub struct DeltaPoller<R> {
    remote: Arc<R>,
    intervals: PollIntervals,
}

impl<R> Clone for DeltaPoller<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            intervals: self.intervals,
        }
    }
}

impl<R: ChatDeltaSource> DeltaPoller<R> {
    pub const fn new(remote: Arc<R>, intervals: PollIntervals) -> Self {
        Self { remote, intervals }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Start polling from `since` (`None` requests a full resync).
    ///
    /// Must be called inside a Tokio runtime.
    pub fn stream(&self, since: Option<DateTime<Utc>>) -> DeltaSubscription {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        tokio::spawn(poll_loop(
            Arc::clone(&self.remote),
            self.intervals,
            since,
            demand_rx,
            batch_tx,
            cancel.clone(),
        ));

        DeltaSubscription {
            demand: demand_tx,
            batches: batch_rx,
            cancel,
        }
    }
}

/// Handle to one running poll loop. Dropping it cancels the loop.
pub struct DeltaSubscription {
    demand: mpsc::Sender<()>,
    batches: mpsc::Receiver<Result<ChatListDelta, SyncError>>,
    cancel: CancellationToken,
}

impl DeltaSubscription {
    /// Request and wait for the next page.
    ///
    /// Returns `None` once the subscription is cancelled or the loop has
    /// ended after reporting a failure. A failure is yielded exactly once.
    pub async fn recv(&mut self) -> Option<Result<ChatListDelta, SyncError>> {
        if self.cancel.is_cancelled() || self.demand.send(()).await.is_err() {
            return None;
        }
        tokio::select! {
            () = self.cancel.cancelled() => None,
            batch = self.batches.recv() => batch,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DeltaSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop<R: ChatDeltaSource>(
    remote: Arc<R>,
    intervals: PollIntervals,
    mut cursor: Option<DateTime<Utc>>,
    mut demand: mpsc::Receiver<()>,
    batches: mpsc::Sender<Result<ChatListDelta, SyncError>>,
    cancel: CancellationToken,
) {
    tracing::debug!(cursor = ?cursor, "Delta poll loop started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            wanted = demand.recv() => {
                if wanted.is_none() {
                    break;
                }
            }
        }

        // Dropping the request future abandons it without a partial result
        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = remote.fetch_chat_deltas(cursor) => result,
        };

        match result {
            Ok(batch) => {
                let delay = intervals.after(&batch);
                let next_cursor = batch.to_timestamp;
                tracing::debug!(
                    changes = batch.changes.len(),
                    has_more = batch.has_more_changes,
                    "Fetched delta page"
                );
                if batches.send(Ok(batch)).await.is_err() {
                    break;
                }
                cursor = Some(next_cursor);

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => {
                tracing::warn!(%error, "Delta fetch failed, ending subscription");
                let _ = batches.send(Err(error.into())).await;
                break;
            }
        }
    }
    tracing::debug!("Delta poll loop stopped");
}
