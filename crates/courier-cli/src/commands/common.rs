use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::error::RemoteError;
use courier_core::models::{
    Chat, ChatId, DeliveryStatus, Message, RemoteSettingValue, SettingKey, SettingRow,
    SettingSyncRequest, SyncResult,
};
use courier_core::remote::{HttpRemote, SettingsRemote};
use courier_core::sync::{
    ChatSyncPipeline, DeltaApplier, DeltaPoller, SettingSyncOutcome, SettingsGateway,
    SettingsSyncEngine,
};
use courier_core::util::normalize_text_option;
use courier_core::{LocalStore, SyncSettings};
use serde::Serialize;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "courier.db";

/// Settings and paths resolved from flags, the config file and the environment.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub settings: SyncSettings,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn load(
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        user: Option<String>,
    ) -> Result<Self, CliError> {
        let config_path = config_path.unwrap_or_else(default_config_path);
        let mut settings = SyncSettings::load_from_path(&config_path)?;
        settings.apply_env();
        if let Some(user) = normalize_text_option(user) {
            settings.user_id = Some(user);
        }
        settings.validate()?;

        let db_path = resolve_db_path(db_path, settings.db_path.clone());
        Ok(Self { settings, db_path })
    }

    pub async fn open_store(&self) -> Result<LocalStore, CliError> {
        let store = LocalStore::open_path(self.db_path.clone()).await?;
        Ok(store.with_retry_policy(self.settings.retry_policy()))
    }

    pub fn remote(&self) -> Result<Arc<HttpRemote>, CliError> {
        let base_url = self.settings.require_api_base_url()?;
        let remote = HttpRemote::new(base_url, self.settings.request_timeout())?;
        Ok(Arc::new(remote))
    }

    pub fn user_id(&self) -> Result<&str, CliError> {
        Ok(self.settings.require_user_id()?)
    }

    pub fn settings_engine<R: SettingsRemote>(
        &self,
        store: LocalStore,
        remote: Arc<R>,
    ) -> SettingsSyncEngine<LocalStore, R> {
        let gateway = SettingsGateway::with_policy(store, self.settings.retry_policy());
        SettingsSyncEngine::new(gateway, remote)
    }

    pub fn chat_pipeline(
        &self,
        store: LocalStore,
        remote: Arc<HttpRemote>,
    ) -> ChatSyncPipeline<HttpRemote> {
        ChatSyncPipeline::new(
            DeltaPoller::new(remote, self.settings.poll_intervals()),
            DeltaApplier::new(store.clone()),
            store,
        )
        .with_resubscribe_delay(self.settings.resubscribe_delay())
    }

    /// Engine for commands that only touch the local replica.
    pub async fn local_settings_engine(
        &self,
    ) -> Result<SettingsSyncEngine<LocalStore, OfflineRemote>, CliError> {
        Ok(self.settings_engine(self.open_store().await?, Arc::new(OfflineRemote)))
    }
}

/// Settings remote for local-only commands; every request fails as offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

impl SettingsRemote for OfflineRemote {
    async fn sync_one(&self, _request: SettingSyncRequest) -> Result<SyncResult, RemoteError> {
        Err(RemoteError::NetworkNotAvailable)
    }

    async fn sync_batch(
        &self,
        _requests: Vec<SettingSyncRequest>,
    ) -> Result<HashMap<SettingKey, SyncResult>, RemoteError> {
        Err(RemoteError::NetworkNotAvailable)
    }

    async fn fetch_settings(
        &self,
        _user_id: &str,
    ) -> Result<HashMap<SettingKey, RemoteSettingValue>, RemoteError> {
        Err(RemoteError::NetworkNotAvailable)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join(DB_FILE_NAME)
}

/// `--db-path` wins over the configured path, which wins over the default.
pub fn resolve_db_path(cli_db_path: Option<PathBuf>, configured: Option<PathBuf>) -> PathBuf {
    cli_db_path.or(configured).unwrap_or_else(default_db_path)
}

pub fn parse_id<T: FromStr>(kind: &'static str, value: &str) -> Result<T, CliError> {
    value.trim().parse().map_err(|_| CliError::InvalidId {
        kind,
        value: value.to_string(),
    })
}

pub fn parse_setting_key(value: &str) -> Result<SettingKey, CliError> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::UnknownSettingKey(value.to_string()))
}

pub fn normalize_text(parts: &[String]) -> Result<String, CliError> {
    normalize_text_option(Some(parts.join(" "))).ok_or(CliError::EmptyText)
}

#[derive(Debug, Serialize)]
pub struct ChatListItem {
    pub id: String,
    pub name: String,
    pub participants: usize,
    pub unread_messages: u32,
    pub updated_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct MessageListItem {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub created_at: String,
    pub edited: bool,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingItem {
    pub key: String,
    pub value: String,
    pub local_version: i64,
    pub synced_version: i64,
    pub server_version: i64,
    pub status: String,
    pub modified_at: String,
}

pub fn chat_to_list_item(chat: &Chat, now: DateTime<Utc>) -> ChatListItem {
    ChatListItem {
        id: chat.id.to_string(),
        name: chat.metadata.name.clone(),
        participants: chat.metadata.participants.len(),
        unread_messages: chat.metadata.unread_messages_count,
        updated_at: format_timestamp(chat.updated_at),
        relative_time: format_relative_time(chat.updated_at, now),
    }
}

pub fn message_to_list_item(message: &Message) -> MessageListItem {
    MessageListItem {
        id: message.id.to_string(),
        sender: message.sender.to_string(),
        text: message.text.clone(),
        created_at: format_timestamp(message.created_at),
        edited: message.edited_at.is_some(),
        status: message.delivery_status.as_ref().map(format_delivery_status),
    }
}

pub fn setting_to_item(row: &SettingRow) -> SettingItem {
    SettingItem {
        key: row.key.to_string(),
        value: row.value.clone(),
        local_version: row.local_version,
        synced_version: row.synced_version,
        server_version: row.server_version,
        status: row.sync_status.as_str().to_string(),
        modified_at: format_timestamp(row.modified_at),
    }
}

pub fn format_chat_lines(chats: &[Chat], now: DateTime<Utc>) -> Vec<String> {
    chats
        .iter()
        .map(|chat| {
            let id = chat.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let name = preview(&chat.metadata.name, 32);
            let relative_time = format_relative_time(chat.updated_at, now);
            let unread = chat.metadata.unread_messages_count;

            if unread == 0 {
                format!("{short_id:<13}  {name:<32}  {relative_time}")
            } else {
                format!("{short_id:<13}  {name:<32}  {relative_time:<10}  {unread} unread")
            }
        })
        .collect()
}

pub fn format_message_lines(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| {
            let sender = message.sender.to_string();
            let short_sender = sender.chars().take(8).collect::<String>();
            let mut line = format!(
                "{}  {short_sender}  {}",
                message.created_at.format("%Y-%m-%d %H:%M"),
                preview(&message.text, 60)
            );
            if message.edited_at.is_some() {
                line.push_str("  (edited)");
            }
            if let Some(status) = &message.delivery_status {
                line.push_str(&format!("  [{}]", format_delivery_status(status)));
            }
            line
        })
        .collect()
}

pub fn format_setting_lines(rows: &[SettingRow]) -> Vec<String> {
    rows.iter()
        .map(|row| {
            format!(
                "{:<14}  {:<8}  local={} synced={} server={}  {}",
                row.key,
                row.value,
                row.local_version,
                row.synced_version,
                row.server_version,
                row.sync_status.as_str()
            )
        })
        .collect()
}

pub fn format_outcome(key: SettingKey, outcome: &SettingSyncOutcome) -> String {
    match outcome {
        SettingSyncOutcome::AlreadySynced => format!("{key}: already synced"),
        SettingSyncOutcome::Synced { version } => format!("{key}: synced at version {version}"),
        SettingSyncOutcome::ConflictResolved { adopted } => {
            format!("{key}: server value '{adopted}' adopted")
        }
        SettingSyncOutcome::Superseded => {
            format!("{key}: changed again during sync, still pending")
        }
    }
}

pub fn format_delivery_status(status: &DeliveryStatus) -> String {
    match status {
        DeliveryStatus::Sending { progress } => format!("sending {progress}%"),
        DeliveryStatus::Failed { reason } => format!("failed: {reason}"),
        other => other.label().to_string(),
    }
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(value: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - value).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn chat_id_arg(value: &str) -> Result<ChatId, CliError> {
    parse_id("chat", value)
}
