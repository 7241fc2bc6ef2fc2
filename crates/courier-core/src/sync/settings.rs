//! Local-first settings with optimistic synchronization.
//!
//! Local writes bump `local_version` and mark the row pending. Syncing sends
//! the row with the last server version the client saw; the server either
//! accepts it or answers with its own value, which then replaces ours.
//!
//! Every write-back after a sync is a compare-and-swap on the `local_version`
//! that was sent, so an acknowledgement never clears a local edit made while
//! the request was in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::gateway::{SettingsDao, SettingsGateway, SettingsObserver};
use crate::clock::{Clock, SystemClock};
use crate::error::{StorageError, SyncError, ValidationError};
use crate::models::{
    LocalSetting, RemoteSettingValue, Setting, SettingKey, SettingRow, SettingSyncRequest,
    SettingsConflictEvent, SyncResult, SyncStatus,
};
use crate::remote::SettingsRemote;

const CONFLICT_CHANNEL_CAPACITY: usize = 32;

/// What syncing one setting did to the local row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingSyncOutcome {
    /// Nothing was pending
    AlreadySynced,
    /// The server accepted the local value
    Synced { version: i64 },
    /// The server's value replaced the local one
    ConflictResolved { adopted: String },
    /// A newer local write landed while the request was in flight and stays pending
    Superseded,
}

pub struct SettingsSyncEngine<D, R, C = SystemClock> {
    gateway: SettingsGateway<D>,
    remote: Arc<R>,
    clock: C,
    conflicts: broadcast::Sender<SettingsConflictEvent>,
}

impl<D: SettingsDao, R: SettingsRemote> SettingsSyncEngine<D, R, SystemClock> {
    pub fn new(gateway: SettingsGateway<D>, remote: Arc<R>) -> Self {
        Self::with_clock(gateway, remote, SystemClock)
    }
}

impl<D: SettingsDao, R: SettingsRemote, C: Clock> SettingsSyncEngine<D, R, C> {
    pub fn with_clock(gateway: SettingsGateway<D>, remote: Arc<R>, clock: C) -> Self {
        let (conflicts, _) = broadcast::channel(CONFLICT_CHANNEL_CAPACITY);
        Self {
            gateway,
            remote,
            clock,
            conflicts,
        }
    }

    pub const fn gateway(&self) -> &SettingsGateway<D> {
        &self.gateway
    }

    /// Conflicts resolved from now on. Lagging receivers lose the oldest events.
    pub fn subscribe_conflicts(&self) -> broadcast::Receiver<SettingsConflictEvent> {
        self.conflicts.subscribe()
    }

    /// The stored row, or the default a user has before any write.
    pub async fn get_row(
        &self,
        user_id: &str,
        key: SettingKey,
    ) -> Result<SettingRow, StorageError> {
        Ok(self
            .gateway
            .get(user_id, key)
            .await?
            .unwrap_or_else(|| SettingRow::materialized_default(user_id, key, self.clock.now())))
    }

    pub async fn get<T: Setting>(&self, user_id: &str) -> Result<LocalSetting<T>, SyncError> {
        let row = self.get_row(user_id, T::KEY).await?;
        Ok(LocalSetting::from_row(&row)?)
    }

    /// Every setting for `user_id`, defaults included.
    pub async fn list(&self, user_id: &str) -> Result<Vec<SettingRow>, StorageError> {
        let mut stored = self.gateway.list(user_id).await?;
        let now = self.clock.now();
        for key in SettingKey::ALL {
            if !stored.iter().any(|row| row.key == key) {
                stored.push(SettingRow::materialized_default(user_id, key, now));
            }
        }
        stored.sort_by_key(|row| row.key);
        Ok(stored)
    }

    /// Rows with unsent local changes
    pub async fn get_unsynced_settings(
        &self,
        user_id: &str,
    ) -> Result<Vec<SettingRow>, StorageError> {
        self.gateway.get_unsynced(user_id).await
    }

    /// Apply `transform` to the current value.
    ///
    /// Returning an equal value leaves the row untouched.
    pub async fn update<T: Setting>(
        &self,
        user_id: &str,
        transform: impl Fn(T) -> T,
    ) -> Result<LocalSetting<T>, SyncError> {
        let row = self
            .write_value(user_id, T::KEY, |current| {
                let value = T::from_storage(current)?;
                Ok(transform(value).to_storage())
            })
            .await?;
        Ok(LocalSetting::from_row(&row)?)
    }

    /// Set a setting from its textual form, e.g. from the command line.
    pub async fn set_raw(
        &self,
        user_id: &str,
        key: SettingKey,
        raw: &str,
    ) -> Result<SettingRow, SyncError> {
        let value = key.canonicalize(raw)?;
        self.write_value(user_id, key, |_| Ok(value.clone())).await
    }

    async fn write_value(
        &self,
        user_id: &str,
        key: SettingKey,
        compute: impl Fn(&str) -> Result<String, ValidationError>,
    ) -> Result<SettingRow, SyncError> {
        for _ in 0..self.gateway.retry_policy().max_attempts() {
            let stored = self.gateway.get(user_id, key).await?;
            let now = self.clock.now();
            let current = stored
                .clone()
                .unwrap_or_else(|| SettingRow::materialized_default(user_id, key, now));

            let value = compute(&current.value)?;
            if value == current.value {
                return Ok(current);
            }

            let expected = stored.as_ref().map(|row| row.local_version);
            let next = match stored {
                Some(row) => SettingRow {
                    value,
                    local_version: row.local_version + 1,
                    modified_at: now,
                    ..row
                },
                None => SettingRow {
                    value,
                    ..current
                },
            }
            .with_derived_status();

            if self.gateway.compare_and_set(&next, expected).await? {
                tracing::debug!(
                    user_id,
                    key = %key,
                    local_version = next.local_version,
                    "Setting changed locally"
                );
                return Ok(next);
            }
            tracing::debug!(user_id, key = %key, "Concurrent setting write, re-reading");
        }
        Err(StorageError::ConcurrentModification.into())
    }

    /// Send one request and reconcile the local row with the answer.
    pub async fn sync_one(
        &self,
        user_id: &str,
        request: SettingSyncRequest,
    ) -> Result<SyncResult, SyncError> {
        let result = self.remote.sync_one(request.clone()).await?;
        self.reconcile(user_id, &request, &result).await?;
        Ok(result)
    }

    /// Send all requests in one round trip and reconcile every answered key.
    pub async fn sync_batch(
        &self,
        user_id: &str,
        requests: Vec<SettingSyncRequest>,
    ) -> Result<HashMap<SettingKey, SyncResult>, SyncError> {
        let results = self.remote.sync_batch(requests.clone()).await?;
        for request in &requests {
            match results.get(&request.key) {
                Some(result) => {
                    self.reconcile(user_id, request, result).await?;
                }
                None => {
                    tracing::warn!(key = %request.key, "No sync result for setting, left pending");
                }
            }
        }
        Ok(results)
    }

    pub async fn sync_setting(
        &self,
        user_id: &str,
        key: SettingKey,
    ) -> Result<SettingSyncOutcome, SyncError> {
        let Some(row) = self.gateway.get(user_id, key).await? else {
            return Ok(SettingSyncOutcome::AlreadySynced);
        };
        if !row.is_dirty() {
            return Ok(SettingSyncOutcome::AlreadySynced);
        }

        let request = SettingSyncRequest::from_row(&row);
        let result = self.remote.sync_one(request.clone()).await?;
        self.reconcile(user_id, &request, &result).await
    }

    /// Sync every pending setting of `user_id` in one batch.
    pub async fn sync_pending(
        &self,
        user_id: &str,
    ) -> Result<HashMap<SettingKey, SettingSyncOutcome>, SyncError> {
        let pending = self.gateway.get_unsynced(user_id).await?;
        if pending.is_empty() {
            return Ok(HashMap::new());
        }

        let requests: Vec<SettingSyncRequest> =
            pending.iter().map(SettingSyncRequest::from_row).collect();
        let results = self.remote.sync_batch(requests.clone()).await?;

        let mut outcomes = HashMap::with_capacity(requests.len());
        for request in &requests {
            let Some(result) = results.get(&request.key) else {
                tracing::warn!(key = %request.key, "No sync result for setting, left pending");
                continue;
            };
            let outcome = self.reconcile(user_id, request, result).await?;
            outcomes.insert(request.key, outcome);
        }
        tracing::info!(user_id, synced = outcomes.len(), "Settings batch synced");
        Ok(outcomes)
    }

    async fn reconcile(
        &self,
        user_id: &str,
        request: &SettingSyncRequest,
        result: &SyncResult,
    ) -> Result<SettingSyncOutcome, SyncError> {
        let server_value_usable = match result {
            SyncResult::Conflict { server_value, .. } => {
                match request.key.validate_value(server_value) {
                    Ok(()) => true,
                    Err(error) => {
                        tracing::warn!(
                            user_id,
                            key = %request.key,
                            %error,
                            "Server value is unusable, keeping local value at server version"
                        );
                        false
                    }
                }
            }
            SyncResult::Success { .. } => true,
        };

        for _ in 0..self.gateway.retry_policy().max_attempts() {
            let Some(current) = self.gateway.get(user_id, request.key).await? else {
                tracing::warn!(user_id, key = %request.key, "Synced setting no longer stored");
                return Ok(SettingSyncOutcome::Superseded);
            };

            let plan = plan_reconciliation(
                &current,
                request.client_version,
                result,
                server_value_usable,
            );
            if self
                .gateway
                .compare_and_set(&plan.row, Some(current.local_version))
                .await?
            {
                if let Some(server_value) = plan.adopted_from_server {
                    self.publish_conflict(user_id, request.key, current.value, server_value);
                }
                return Ok(plan.outcome);
            }
            tracing::debug!(
                user_id,
                key = %request.key,
                "Setting changed during reconciliation, re-reading"
            );
        }
        Err(StorageError::ConcurrentModification.into())
    }

    /// Rebuild the stored settings of `user_id` from the server's copy.
    ///
    /// Keys the server does not hold get the pending default. A value this
    /// client cannot read is replaced by the default at the server's version.
    /// When the server is unreachable every key is reset to its default.
    pub async fn recover(&self, user_id: &str) -> Result<Vec<SettingRow>, SyncError> {
        let snapshot = match self.remote.fetch_settings(user_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(user_id, %error, "Settings fetch failed, recovering defaults");
                HashMap::new()
            }
        };

        let now = self.clock.now();
        let rows: Vec<SettingRow> = SettingKey::ALL
            .into_iter()
            .map(|key| recovered_row(user_id, key, snapshot.get(&key), now))
            .collect();
        self.gateway.upsert_all(&rows).await?;
        tracing::info!(user_id, from_server = snapshot.len(), "Settings recovered");
        Ok(rows)
    }

    fn publish_conflict(
        &self,
        user_id: &str,
        key: SettingKey,
        local_value: String,
        server_value: String,
    ) {
        tracing::info!(user_id, key = %key, "Server value replaced local setting");
        let event = SettingsConflictEvent {
            user_id: user_id.to_string(),
            key,
            local_value,
            accepted_value: server_value.clone(),
            server_value,
            conflicted_at: self.clock.now(),
        };
        // No receivers is fine
        let _ = self.conflicts.send(event);
    }
}

impl<D: SettingsDao + Clone, R, C> SettingsSyncEngine<D, R, C> {
    pub fn observe(&self, user_id: impl Into<String>) -> SettingsObserver<D> {
        self.gateway.observe(user_id)
    }
}

struct Reconciliation {
    row: SettingRow,
    outcome: SettingSyncOutcome,
    adopted_from_server: Option<String>,
}

/// With `server_value_usable` false a conflict keeps the local value but
/// still settles on the server's version.
fn plan_reconciliation(
    current: &SettingRow,
    sent_version: i64,
    result: &SyncResult,
    server_value_usable: bool,
) -> Reconciliation {
    let in_flight_write = current.local_version != sent_version;
    let mut row = current.clone();

    let (outcome, adopted_from_server) = match result {
        SyncResult::Success { new_version } if in_flight_write => {
            row.server_version = *new_version;
            row.synced_version = row.synced_version.max(sent_version.min(row.local_version));
            (SettingSyncOutcome::Superseded, None)
        }
        SyncResult::Success { new_version } => {
            row.local_version = row.local_version.max(*new_version);
            row.synced_version = row.local_version;
            row.server_version = *new_version;
            (SettingSyncOutcome::Synced { version: *new_version }, None)
        }
        SyncResult::Conflict { server_version, .. } if in_flight_write => {
            row.server_version = *server_version;
            (SettingSyncOutcome::Superseded, None)
        }
        SyncResult::Conflict {
            server_value,
            server_version,
            server_modified_at,
            ..
        } if server_value_usable && *server_value != current.value => {
            adopt(&mut row, server_value, *server_version, *server_modified_at);
            (
                SettingSyncOutcome::ConflictResolved {
                    adopted: server_value.clone(),
                },
                Some(server_value.clone()),
            )
        }
        SyncResult::Conflict { server_version, .. } => {
            row.local_version = row.local_version.max(*server_version);
            row.synced_version = row.local_version;
            row.server_version = *server_version;
            (SettingSyncOutcome::Synced { version: *server_version }, None)
        }
    };

    Reconciliation {
        row: row.with_derived_status(),
        outcome,
        adopted_from_server,
    }
}

fn recovered_row(
    user_id: &str,
    key: SettingKey,
    remote: Option<&RemoteSettingValue>,
    now: DateTime<Utc>,
) -> SettingRow {
    let Some(remote) = remote else {
        return SettingRow::materialized_default(user_id, key, now);
    };
    let value = key.canonicalize(&remote.value).unwrap_or_else(|error| {
        tracing::warn!(key = %key, %error, "Server setting is unreadable, using default");
        key.default_storage_value()
    });
    SettingRow {
        user_id: user_id.to_string(),
        key,
        value,
        local_version: remote.server_version,
        synced_version: remote.server_version,
        server_version: remote.server_version,
        modified_at: now,
        sync_status: SyncStatus::Synced,
    }
}

fn adopt(row: &mut SettingRow, value: &str, server_version: i64, modified_at: DateTime<Utc>) {
    row.value = value.to_string();
    row.local_version = (row.local_version + 1).max(server_version);
    row.synced_version = row.local_version;
    row.server_version = server_version;
    row.modified_at = modified_at;
    row.sync_status = SyncStatus::Synced;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::models::{NotificationsEnabled, UiLanguage};
    use crate::sync::gateway::tests::FaultyDao;
    use crate::util::from_millis;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers requests from a script and records what was sent.
    #[derive(Default)]
    struct ScriptedSettingsRemote {
        answers: Mutex<VecDeque<Result<HashMap<SettingKey, SyncResult>, RemoteError>>>,
        sent: Mutex<Vec<Vec<SettingSyncRequest>>>,
        snapshot: Mutex<Option<HashMap<SettingKey, RemoteSettingValue>>>,
    }

    impl ScriptedSettingsRemote {
        fn answering(
            answers: impl IntoIterator<Item = Result<HashMap<SettingKey, SyncResult>, RemoteError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().collect()),
                sent: Mutex::new(Vec::new()),
                snapshot: Mutex::new(None),
            })
        }

        fn holding(snapshot: HashMap<SettingKey, RemoteSettingValue>) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(Some(snapshot)),
                ..Self::default()
            })
        }

        fn sent(&self) -> Vec<Vec<SettingSyncRequest>> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SettingsRemote for ScriptedSettingsRemote {
        async fn sync_one(&self, request: SettingSyncRequest) -> Result<SyncResult, RemoteError> {
            let key = request.key;
            let mut results = self.sync_batch(vec![request]).await?;
            results.remove(&key).ok_or(RemoteError::ServerError)
        }

        async fn sync_batch(
            &self,
            requests: Vec<SettingSyncRequest>,
        ) -> Result<HashMap<SettingKey, SyncResult>, RemoteError> {
            self.sent.lock().unwrap().push(requests);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(RemoteError::ServerUnreachable))
        }

        async fn fetch_settings(
            &self,
            _user_id: &str,
        ) -> Result<HashMap<SettingKey, RemoteSettingValue>, RemoteError> {
            self.snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or(RemoteError::ServerUnreachable)
        }
    }

    fn answer(
        key: SettingKey,
        result: SyncResult,
    ) -> Result<HashMap<SettingKey, SyncResult>, RemoteError> {
        Ok(HashMap::from([(key, result)]))
    }

    fn german_conflict() -> SyncResult {
        SyncResult::Conflict {
            server_value: "German".to_string(),
            server_version: 2,
            new_version: 2,
            server_modified_at: from_millis(500),
        }
    }

    type Engine = SettingsSyncEngine<FaultyDao, ScriptedSettingsRemote, ManualClock>;

    fn engine(remote: Arc<ScriptedSettingsRemote>) -> (FaultyDao, Engine) {
        let dao = FaultyDao::default();
        let engine = SettingsSyncEngine::with_clock(
            SettingsGateway::new(dao.clone()),
            remote,
            ManualClock::new(from_millis(1_000)),
        );
        (dao, engine)
    }

    fn assert_versions(row: &SettingRow) {
        assert!(row.local_version >= row.synced_version, "{row:?}");
        assert_eq!(
            row.sync_status,
            SyncStatus::from_versions(row.local_version, row.synced_version)
        );
    }

    #[tokio::test]
    async fn test_unchanged_value_is_not_written() {
        let (dao, engine) = engine(ScriptedSettingsRemote::answering([]));

        let setting = engine
            .update::<UiLanguage>("u1", |language| language)
            .await
            .unwrap();

        assert_eq!(setting.local_version, 1);
        assert_eq!(setting.sync_status, SyncStatus::Pending);
        assert_eq!(dao.list("u1").await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn test_unchanged_value_keeps_stored_version() {
        let (_dao, engine) = engine(ScriptedSettingsRemote::answering([]));
        engine.update("u1", |_| UiLanguage::German).await.unwrap();

        let again = engine.update("u1", |_| UiLanguage::German).await.unwrap();

        assert_eq!(again.local_version, 1);
    }

    #[tokio::test]
    async fn test_local_writes_bump_version_and_mark_pending() {
        let (_dao, engine) = engine(ScriptedSettingsRemote::answering([]));

        let first = engine.update("u1", |_| UiLanguage::German).await.unwrap();
        let second = engine.update("u1", |_| UiLanguage::English).await.unwrap();

        assert_eq!(first.local_version, 1);
        assert_eq!(second.local_version, 2);
        assert_eq!(second.sync_status, SyncStatus::Pending);
        assert_eq!(engine.get_unsynced_settings("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_adopts_server_value() {
        let remote =
            ScriptedSettingsRemote::answering([answer(SettingKey::UiLanguage, german_conflict())]);
        let (dao, engine) = engine(remote);
        dao.upsert(&SettingRow {
            user_id: "u1".to_string(),
            key: SettingKey::UiLanguage,
            value: "English".to_string(),
            local_version: 1,
            synced_version: 0,
            server_version: 0,
            modified_at: from_millis(100),
            sync_status: SyncStatus::Pending,
        })
        .await
        .unwrap();
        let mut conflicts = engine.subscribe_conflicts();

        let outcome = engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap();

        assert_eq!(
            outcome,
            SettingSyncOutcome::ConflictResolved {
                adopted: "German".to_string()
            }
        );
        let setting = engine.get::<UiLanguage>("u1").await.unwrap();
        assert_eq!(setting.value, UiLanguage::German);
        assert_eq!(setting.synced_version, 2);
        assert_eq!(setting.sync_status, SyncStatus::Synced);

        let event = conflicts.try_recv().unwrap();
        assert_eq!(event.local_value, "English");
        assert_eq!(event.accepted_value, "German");
        assert_eq!(event.conflicted_at, from_millis(1_000));
    }

    #[tokio::test]
    async fn test_success_clears_pending() {
        let remote = ScriptedSettingsRemote::answering([answer(
            SettingKey::Notifications,
            SyncResult::Success { new_version: 1 },
        )]);
        let (_dao, engine) = engine(Arc::clone(&remote));
        engine
            .update("u1", |_| NotificationsEnabled(false))
            .await
            .unwrap();

        let outcome = engine.sync_setting("u1", SettingKey::Notifications).await.unwrap();

        assert_eq!(outcome, SettingSyncOutcome::Synced { version: 1 });
        let row = engine.get_row("u1", SettingKey::Notifications).await.unwrap();
        assert_eq!((row.local_version, row.synced_version, row.server_version), (1, 1, 1));
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(remote.sent()[0][0].last_known_server_version, 0);
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_clear_newer_write() {
        let (_dao, engine) = engine(ScriptedSettingsRemote::answering([]));
        let sent = engine.set_raw("u1", SettingKey::UiLanguage, "German").await.unwrap();
        let request = SettingSyncRequest::from_row(&sent);
        engine.set_raw("u1", SettingKey::UiLanguage, "English").await.unwrap();

        let outcome = engine
            .reconcile("u1", &request, &SyncResult::Success { new_version: 1 })
            .await
            .unwrap();

        assert_eq!(outcome, SettingSyncOutcome::Superseded);
        let row = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(row.value, "English");
        assert_eq!((row.local_version, row.synced_version, row.server_version), (2, 1, 1));
        assert_eq!(row.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_conflict_with_same_value_does_not_bump() {
        let remote =
            ScriptedSettingsRemote::answering([answer(SettingKey::UiLanguage, german_conflict())]);
        let (_dao, engine) = engine(remote);
        engine.update("u1", |_| UiLanguage::German).await.unwrap();
        let mut conflicts = engine.subscribe_conflicts();

        let outcome = engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap();

        assert_eq!(outcome, SettingSyncOutcome::Synced { version: 2 });
        let row = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!((row.local_version, row.synced_version), (2, 2));
        assert!(conflicts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unusable_server_value_keeps_local_value_and_converges() {
        let klingon = SyncResult::Conflict {
            server_value: "Klingon".to_string(),
            server_version: 3,
            new_version: 3,
            server_modified_at: from_millis(1),
        };
        let remote = ScriptedSettingsRemote::answering([
            answer(SettingKey::UiLanguage, klingon.clone()),
            answer(SettingKey::UiLanguage, klingon),
        ]);
        let (_dao, engine) = engine(Arc::clone(&remote));
        engine.update("u1", |_| UiLanguage::German).await.unwrap();
        let mut conflicts = engine.subscribe_conflicts();

        let outcome = engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap();

        assert_eq!(outcome, SettingSyncOutcome::Synced { version: 3 });
        let row = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(row.value, "German");
        assert_eq!((row.local_version, row.synced_version, row.server_version), (3, 3, 3));
        assert!(!row.is_dirty());
        assert_versions(&row);
        assert!(conflicts.try_recv().is_err());

        assert_eq!(
            engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap(),
            SettingSyncOutcome::AlreadySynced
        );
        assert_eq!(remote.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_behind_local_version_keeps_versions_ordered() {
        let remote =
            ScriptedSettingsRemote::answering([answer(SettingKey::UiLanguage, german_conflict())]);
        let (dao, engine) = engine(remote);
        dao.upsert(&SettingRow {
            user_id: "u1".to_string(),
            key: SettingKey::UiLanguage,
            value: "English".to_string(),
            local_version: 5,
            synced_version: 4,
            server_version: 1,
            modified_at: from_millis(100),
            sync_status: SyncStatus::Pending,
        })
        .await
        .unwrap();

        let outcome = engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap();

        assert_eq!(
            outcome,
            SettingSyncOutcome::ConflictResolved {
                adopted: "German".to_string()
            }
        );
        let row = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(row.value, "German");
        assert_eq!((row.local_version, row.synced_version, row.server_version), (6, 6, 2));
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_versions(&row);
    }

    #[tokio::test]
    async fn test_recover_seeds_rows_from_server_snapshot() {
        let remote = ScriptedSettingsRemote::holding(HashMap::from([(
            SettingKey::UiLanguage,
            RemoteSettingValue {
                value: "German".to_string(),
                server_version: 4,
            },
        )]));
        let (dao, engine) = engine(remote);

        let rows = engine.recover("u1").await.unwrap();

        assert_eq!(rows.len(), 2);
        let language = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(language.value, "German");
        assert_eq!(
            (language.local_version, language.synced_version, language.server_version),
            (4, 4, 4)
        );
        assert_eq!(language.sync_status, SyncStatus::Synced);

        let notifications = engine.get_row("u1", SettingKey::Notifications).await.unwrap();
        assert_eq!(notifications.value, "true");
        assert_eq!(notifications.sync_status, SyncStatus::Pending);
        for row in dao.list("u1").await.unwrap() {
            assert_versions(&row);
        }
    }

    #[tokio::test]
    async fn test_recover_replaces_unreadable_server_value_with_default() {
        let remote = ScriptedSettingsRemote::holding(HashMap::from([(
            SettingKey::UiLanguage,
            RemoteSettingValue {
                value: "Klingon".to_string(),
                server_version: 7,
            },
        )]));
        let (_dao, engine) = engine(remote);

        engine.recover("u1").await.unwrap();

        let row = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(row.value, SettingKey::UiLanguage.default_storage_value());
        assert_eq!((row.local_version, row.synced_version, row.server_version), (7, 7, 7));
        assert!(!row.is_dirty());
    }

    #[tokio::test]
    async fn test_recover_without_server_resets_to_pending_defaults() {
        let (dao, engine) = engine(ScriptedSettingsRemote::answering([]));
        engine.update("u1", |_| UiLanguage::German).await.unwrap();

        let rows = engine.recover("u1").await.unwrap();

        assert!(rows.iter().all(|row| row.local_version == 1 && row.is_dirty()));
        assert_eq!(dao.list("u1").await.unwrap().len(), 2);
        let language = engine.get_row("u1", SettingKey::UiLanguage).await.unwrap();
        assert_eq!(language.value, SettingKey::UiLanguage.default_storage_value());
    }

    #[tokio::test]
    async fn test_sync_pending_sends_one_batch() {
        let remote = ScriptedSettingsRemote::answering([Ok(HashMap::from([
            (SettingKey::UiLanguage, SyncResult::Success { new_version: 4 }),
            (SettingKey::Notifications, SyncResult::Success { new_version: 1 }),
        ]))]);
        let (dao, engine) = engine(Arc::clone(&remote));
        engine.update("u1", |_| UiLanguage::German).await.unwrap();
        engine
            .update("u1", |_| NotificationsEnabled(false))
            .await
            .unwrap();

        let outcomes = engine.sync_pending("u1").await.unwrap();

        assert_eq!(remote.sent().len(), 1);
        assert_eq!(remote.sent()[0].len(), 2);
        assert_eq!(
            outcomes[&SettingKey::UiLanguage],
            SettingSyncOutcome::Synced { version: 4 }
        );
        assert!(engine.get_unsynced_settings("u1").await.unwrap().is_empty());
        for row in dao.list("u1").await.unwrap() {
            assert_versions(&row);
        }
    }

    #[tokio::test]
    async fn test_nothing_pending_skips_remote() {
        let remote = ScriptedSettingsRemote::answering([]);
        let (_dao, engine) = engine(Arc::clone(&remote));

        assert_eq!(
            engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap(),
            SettingSyncOutcome::AlreadySynced
        );
        assert!(engine.sync_pending("u1").await.unwrap().is_empty());
        assert!(remote.sent().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_row_pending() {
        let remote = ScriptedSettingsRemote::answering([Err(RemoteError::Timeout)]);
        let (_dao, engine) = engine(remote);
        engine.update("u1", |_| UiLanguage::German).await.unwrap();

        let error = engine.sync_setting("u1", SettingKey::UiLanguage).await.unwrap_err();

        assert_eq!(error, SyncError::Remote(RemoteError::Timeout));
        assert!(engine.get_row("u1", SettingKey::UiLanguage).await.unwrap().is_dirty());
    }

    #[tokio::test]
    async fn test_list_fills_in_defaults() {
        let (_dao, engine) = engine(ScriptedSettingsRemote::answering([]));
        engine.update("u1", |_| UiLanguage::German).await.unwrap();

        let rows = engine.list("u1").await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "German");
        assert_eq!(rows[1].value, "true");
    }
}
