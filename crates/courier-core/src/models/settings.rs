//! Per-user settings with optimistic-concurrency sync metadata

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Keys of the settings that travel to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    UiLanguage,
    Notifications,
}

impl SettingKey {
    pub const ALL: [Self; 2] = [Self::UiLanguage, Self::Notifications];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UiLanguage => "ui_language",
            Self::Notifications => "notifications",
        }
    }

    /// Storage form of the value a user gets before ever touching this setting
    pub fn default_storage_value(self) -> String {
        match self {
            Self::UiLanguage => UiLanguage::default_value().to_storage(),
            Self::Notifications => NotificationsEnabled::default_value().to_storage(),
        }
    }

    /// Parse `raw` and re-encode it in storage form (`"on"` becomes `"true"`).
    pub fn canonicalize(self, raw: &str) -> Result<String, ValidationError> {
        match self {
            Self::UiLanguage => UiLanguage::from_storage(raw).map(|value| value.to_storage()),
            Self::Notifications => {
                NotificationsEnabled::from_storage(raw).map(|value| value.to_storage())
            }
        }
    }

    /// Check that `raw` parses as a value of this setting.
    pub fn validate_value(self, raw: &str) -> Result<(), ValidationError> {
        match self {
            Self::UiLanguage => UiLanguage::from_storage(raw).map(|_| ()),
            Self::Notifications => NotificationsEnabled::from_storage(raw).map(|_| ()),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ValidationError::new("key", format!("unknown setting key '{s}'")))
    }
}

/// A typed setting value with a fixed storage encoding.
pub trait Setting: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KEY: SettingKey;

    fn default_value() -> Self;

    fn to_storage(&self) -> String;

    fn from_storage(raw: &str) -> Result<Self, ValidationError>;
}

/// Interface language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UiLanguage {
    #[default]
    English,
    German,
}

impl Setting for UiLanguage {
    const KEY: SettingKey = SettingKey::UiLanguage;

    fn default_value() -> Self {
        Self::default()
    }

    fn to_storage(&self) -> String {
        match self {
            Self::English => "English",
            Self::German => "German",
        }
        .to_string()
    }

    fn from_storage(raw: &str) -> Result<Self, ValidationError> {
        match raw {
            "English" => Ok(Self::English),
            "German" => Ok(Self::German),
            other => Err(ValidationError::new(
                SettingKey::UiLanguage.as_str(),
                format!("unsupported language '{other}'"),
            )),
        }
    }
}

/// Whether push notifications are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationsEnabled(pub bool);

impl Setting for NotificationsEnabled {
    const KEY: SettingKey = SettingKey::Notifications;

    fn default_value() -> Self {
        Self(true)
    }

    fn to_storage(&self) -> String {
        self.0.to_string()
    }

    fn from_storage(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Ok(Self(true)),
            "false" | "0" | "off" => Ok(Self(false)),
            other => Err(ValidationError::new(
                SettingKey::Notifications.as_str(),
                format!("expected a boolean, got '{other}'"),
            )),
        }
    }
}

/// Whether a setting still has local changes the server has not acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
}

impl SyncStatus {
    pub const fn from_versions(local_version: i64, synced_version: i64) -> Self {
        if local_version > synced_version {
            Self::Pending
        } else {
            Self::Synced
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            other => Err(ValidationError::new(
                "sync_status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

/// Untyped settings row as held by the local store, one per (user, key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingRow {
    pub user_id: String,
    pub key: SettingKey,
    pub value: String,
    pub local_version: i64,
    pub synced_version: i64,
    pub server_version: i64,
    pub modified_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
}

impl SettingRow {
    /// The row a user implicitly has before any local write.
    pub fn materialized_default(
        user_id: impl Into<String>,
        key: SettingKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            key,
            value: key.default_storage_value(),
            local_version: 1,
            synced_version: 0,
            server_version: 0,
            modified_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Recompute `sync_status` from the version pair.
    #[must_use]
    pub const fn with_derived_status(mut self) -> Self {
        self.sync_status = SyncStatus::from_versions(self.local_version, self.synced_version);
        self
    }

    pub const fn is_dirty(&self) -> bool {
        self.local_version > self.synced_version
    }
}

/// Typed view of a [`SettingRow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSetting<T> {
    pub value: T,
    pub local_version: i64,
    pub synced_version: i64,
    pub server_version: i64,
    pub modified_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
}

impl<T: Setting> LocalSetting<T> {
    pub fn from_row(row: &SettingRow) -> Result<Self, ValidationError> {
        if row.key != T::KEY {
            return Err(ValidationError::new(
                "key",
                format!("expected {}, found {}", T::KEY, row.key),
            ));
        }
        Ok(Self {
            value: T::from_storage(&row.value)?,
            local_version: row.local_version,
            synced_version: row.synced_version,
            server_version: row.server_version,
            modified_at: row.modified_at,
            sync_status: row.sync_status,
        })
    }

    pub fn into_row(self, user_id: impl Into<String>) -> SettingRow {
        SettingRow {
            user_id: user_id.into(),
            key: T::KEY,
            value: self.value.to_storage(),
            local_version: self.local_version,
            synced_version: self.synced_version,
            server_version: self.server_version,
            modified_at: self.modified_at,
            sync_status: self.sync_status,
        }
    }
}

/// What the client sends for one setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingSyncRequest {
    pub key: SettingKey,
    pub value: String,
    pub client_version: i64,
    pub last_known_server_version: i64,
    pub modified_at: DateTime<Utc>,
}

impl SettingSyncRequest {
    pub fn from_row(row: &SettingRow) -> Self {
        Self {
            key: row.key,
            value: row.value.clone(),
            client_version: row.local_version,
            last_known_server_version: row.server_version,
            modified_at: row.modified_at,
        }
    }
}

/// Server verdict for one setting in a sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// The client's write was accepted
    Success { new_version: i64 },
    /// The server holds a newer value which wins
    Conflict {
        server_value: String,
        server_version: i64,
        new_version: i64,
        server_modified_at: DateTime<Utc>,
    },
}

/// A setting as the server currently stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettingValue {
    pub value: String,
    pub server_version: i64,
}

/// Published whenever a conflict replaced the local value with the server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsConflictEvent {
    pub user_id: String,
    pub key: SettingKey,
    pub local_value: String,
    pub server_value: String,
    pub accepted_value: String,
    pub conflicted_at: DateTime<Utc>,
}
