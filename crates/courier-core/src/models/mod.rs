//! Data models for Courier

mod chat;
mod delta;
mod message;
mod settings;

pub use chat::{Chat, ChatId, ChatMetadata, Participant, ParticipantId, Rule};
pub use delta::{ChatDelta, ChatListDelta};
pub use message::{validate_text, DeliveryStatus, Message, MessageId, MAX_TEXT_LENGTH};
pub use settings::{
    LocalSetting, NotificationsEnabled, RemoteSettingValue, Setting, SettingKey, SettingRow,
    SettingSyncRequest, SettingsConflictEvent, SyncResult, SyncStatus, UiLanguage,
};
