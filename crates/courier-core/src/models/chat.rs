//! Chat, participant and rule models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7
            #[must_use]
            pub fn new() -> Self {
                Self(::uuid::Uuid::now_v7())
            }

            #[must_use]
            pub const fn from_uuid(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(::uuid::Uuid::parse_str(s)?))
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(
    /// Identifier of a chat, assigned by the server
    ChatId
);

uuid_id!(
    /// Identifier of a chat participant
    ParticipantId
);

/// A member of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub online_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_moderator: bool,
}

/// Moderation rules attached to a chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Rule {
    #[serde(rename_all = "camelCase")]
    CanNotWriteAfterJoining { duration_millis: u64 },
    #[serde(rename_all = "camelCase")]
    Debounce { delay_millis: u64 },
    #[serde(rename_all = "camelCase")]
    EditWindow { duration_millis: u64 },
    SenderIdCanNotChange,
    RecipientCanNotChange,
    CreationTimeCanNotChange,
    #[serde(rename_all = "camelCase")]
    DeleteWindow { duration_millis: u64 },
    SenderCanDeleteOwn,
    AdminCanDeleteAny,
    ModeratorCanDeleteAny,
    NoDeleteAfterDelivered,
    #[serde(rename_all = "camelCase")]
    DeleteForEveryoneWindow { duration_millis: u64 },
    OnlyAdminCanDelete,
}

/// Full snapshot of a chat's lightweight attributes.
///
/// Always resent in full on change. Messages never travel inside metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub name: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub picture_url: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub unread_messages_count: u32,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl ChatMetadata {
    /// Metadata for a chat with only a name set
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            participants: Vec::new(),
            picture_url: None,
            rules: Vec::new(),
            unread_messages_count: 0,
            last_read_message_id: None,
            last_activity_at: None,
        }
    }

    #[must_use]
    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }
}

/// A chat as held in the local replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub metadata: ChatMetadata,
    /// Commit time of the delta that last touched this chat
    pub updated_at: DateTime<Utc>,
}
