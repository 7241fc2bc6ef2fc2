//! Wire shapes exchanged with the chat service.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::models::{
    ChatDelta, ChatId, ChatListDelta, ChatMetadata, Message, MessageId, RemoteSettingValue,
    SettingKey, SettingSyncRequest, SyncResult,
};

/// Envelope around every response body
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ErrorResponseDto>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, mapping an error envelope to [`RemoteError`].
    pub fn into_result(self) -> Result<T, RemoteError> {
        if let Some(error) = self.error {
            return Err(error.into_remote_error());
        }
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(RemoteError::ServerError),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponseDto {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl ErrorResponseDto {
    pub fn into_remote_error(self) -> RemoteError {
        ApiErrorCode::parse(&self.code, &self.details).into_remote_error(self.code, self.message)
    }
}

/// Error codes the service is known to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    ChatNotFound,
    MessageNotFound,
    RateLimitExceeded,
    CooldownActive { remaining_ms: u64 },
    Unauthorized,
    NetworkNotAvailable,
    ServerUnreachable,
    ServerError,
    Unknown,
}

impl ApiErrorCode {
    pub fn parse(code: &str, details: &HashMap<String, String>) -> Self {
        match code {
            "CHAT_NOT_FOUND" => Self::ChatNotFound,
            "MESSAGE_NOT_FOUND" => Self::MessageNotFound,
            "RATE_LIMIT_EXCEEDED" => Self::RateLimitExceeded,
            "COOLDOWN_ACTIVE" => Self::CooldownActive {
                remaining_ms: details
                    .get("remainingMs")
                    .and_then(|value| value.trim().parse().ok())
                    .unwrap_or(0),
            },
            "UNAUTHORIZED" => Self::Unauthorized,
            "NETWORK_NOT_AVAILABLE" => Self::NetworkNotAvailable,
            "SERVER_UNREACHABLE" => Self::ServerUnreachable,
            "SERVER_ERROR" => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    fn into_remote_error(self, code: String, message: String) -> RemoteError {
        match self {
            Self::ChatNotFound => RemoteError::ChatNotFound,
            Self::MessageNotFound => RemoteError::MessageNotFound,
            Self::RateLimitExceeded => RemoteError::RateLimitExceeded,
            Self::CooldownActive { remaining_ms } => RemoteError::CooldownActive {
                remaining: Duration::from_millis(remaining_ms),
            },
            Self::Unauthorized => RemoteError::Unauthorized,
            Self::NetworkNotAvailable => RemoteError::NetworkNotAvailable,
            Self::ServerUnreachable => RemoteError::ServerUnreachable,
            Self::ServerError => RemoteError::ServerError,
            Self::Unknown => RemoteError::Unknown { code, message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatDeltaDto {
    #[serde(rename_all = "camelCase")]
    Created {
        chat_id: ChatId,
        chat_metadata: ChatMetadata,
        #[serde(default)]
        initial_messages: Vec<Message>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Updated {
        chat_id: ChatId,
        chat_metadata: ChatMetadata,
        #[serde(default)]
        messages_to_add: Vec<Message>,
        #[serde(default)]
        messages_to_delete: Vec<MessageId>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Deleted {
        chat_id: ChatId,
        timestamp: DateTime<Utc>,
    },
}

impl From<ChatDeltaDto> for ChatDelta {
    fn from(dto: ChatDeltaDto) -> Self {
        match dto {
            ChatDeltaDto::Created {
                chat_id,
                chat_metadata,
                initial_messages,
                timestamp,
            } => Self::Created {
                chat_id,
                metadata: chat_metadata,
                initial_messages,
                timestamp,
            },
            ChatDeltaDto::Updated {
                chat_id,
                chat_metadata,
                messages_to_add,
                messages_to_delete,
                timestamp,
            } => Self::Updated {
                chat_id,
                metadata: chat_metadata,
                messages_to_add,
                messages_to_delete,
                timestamp,
            },
            ChatDeltaDto::Deleted { chat_id, timestamp } => Self::Deleted { chat_id, timestamp },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListDeltaDto {
    #[serde(default)]
    pub changes: Vec<ChatDeltaDto>,
    #[serde(default)]
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_more_changes: bool,
}

impl From<ChatListDeltaDto> for ChatListDelta {
    fn from(dto: ChatListDeltaDto) -> Self {
        Self {
            changes: dto.changes.into_iter().map(ChatDelta::from).collect(),
            from_timestamp: dto.from_timestamp,
            to_timestamp: dto.to_timestamp,
            has_more_changes: dto.has_more_changes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSettingsRequestDto {
    pub settings: Vec<SettingSyncItemDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingSyncItemDto {
    pub key: String,
    pub value: String,
    pub client_version: i64,
    pub last_known_server_version: i64,
    pub modified_at: DateTime<Utc>,
}

impl From<&SettingSyncRequest> for SettingSyncItemDto {
    fn from(request: &SettingSyncRequest) -> Self {
        Self {
            key: request.key.as_str().to_string(),
            value: request.value.clone(),
            client_version: request.client_version,
            last_known_server_version: request.last_known_server_version,
            modified_at: request.modified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettingsResponseDto {
    #[serde(default)]
    pub settings: Vec<SettingItemDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingItemDto {
    pub key: String,
    pub value: String,
    pub version: i64,
}

impl SettingItemDto {
    /// Unknown keys and versions below 1 yield `None`.
    pub fn into_domain(self) -> Option<(SettingKey, RemoteSettingValue)> {
        let Ok(key) = self.key.parse::<SettingKey>() else {
            tracing::warn!(key = %self.key, "Ignoring server setting with unknown key");
            return None;
        };
        if self.version < 1 {
            tracing::warn!(
                key = %key,
                version = self.version,
                "Ignoring unversioned server setting"
            );
            return None;
        }
        Some((
            key,
            RemoteSettingValue {
                value: self.value,
                server_version: self.version,
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncSettingsResponseDto {
    pub results: Vec<SettingSyncResultDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SettingSyncResultDto {
    #[serde(rename_all = "camelCase")]
    Success { key: String, new_version: i64 },
    #[serde(rename_all = "camelCase")]
    Conflict {
        key: String,
        new_version: i64,
        server_value: String,
        server_version: i64,
        server_modified_at: DateTime<Utc>,
    },
}

impl SettingSyncResultDto {
    /// Results for keys this client does not know yield `None` and are skipped.
    pub fn into_domain(self) -> Option<(SettingKey, SyncResult)> {
        let (key, result) = match self {
            Self::Success { key, new_version } => (key, SyncResult::Success { new_version }),
            Self::Conflict {
                key,
                new_version,
                server_value,
                server_version,
                server_modified_at,
            } => (
                key,
                SyncResult::Conflict {
                    server_value,
                    server_version,
                    new_version,
                    server_modified_at,
                },
            ),
        };
        match key.parse::<SettingKey>() {
            Ok(key) => Some((key, result)),
            Err(_) => {
                tracing::warn!(key = %key, "Ignoring sync result for unknown setting key");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequestDto<'a> {
    pub message: &'a Message,
}
