//! Seams to the chat service.
//!
//! The sync subsystems only see these traits. [`HttpRemote`] is the
//! production implementation; tests use in-memory fakes.

pub mod dto;
mod http;

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::models::{
    ChatListDelta, RemoteSettingValue, SettingKey, SettingSyncRequest, SyncResult,
};

pub use http::{HttpRemote, DEFAULT_REQUEST_TIMEOUT};

/// Source of incremental chat changes
pub trait ChatDeltaSource: Send + Sync + 'static {
    /// Fetch the page of changes after `since` (`None`: everything).
    fn fetch_chat_deltas(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<ChatListDelta, RemoteError>> + Send;
}

/// Server side of settings synchronization
pub trait SettingsRemote: Send + Sync + 'static {
    fn sync_one(
        &self,
        request: SettingSyncRequest,
    ) -> impl Future<Output = Result<SyncResult, RemoteError>> + Send;

    /// All requests travel in one round trip. The reply holds one result per key.
    fn sync_batch(
        &self,
        requests: Vec<SettingSyncRequest>,
    ) -> impl Future<Output = Result<HashMap<SettingKey, SyncResult>, RemoteError>> + Send;

    /// Every setting the server holds for `user_id`. Keys it never stored are absent.
    fn fetch_settings(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<HashMap<SettingKey, RemoteSettingValue>, RemoteError>> + Send;
}
