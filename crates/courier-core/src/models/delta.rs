//! Incremental chat change records

use chrono::{DateTime, Utc};

use super::{ChatId, ChatMetadata, Message, MessageId};
use crate::error::ValidationError;

/// A single change to one chat, stamped with the server's commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    Created {
        chat_id: ChatId,
        metadata: ChatMetadata,
        initial_messages: Vec<Message>,
        timestamp: DateTime<Utc>,
    },
    Updated {
        chat_id: ChatId,
        metadata: ChatMetadata,
        messages_to_add: Vec<Message>,
        messages_to_delete: Vec<MessageId>,
        timestamp: DateTime<Utc>,
    },
    Deleted {
        chat_id: ChatId,
        timestamp: DateTime<Utc>,
    },
}

impl ChatDelta {
    pub const fn chat_id(&self) -> ChatId {
        match self {
            Self::Created { chat_id, .. }
            | Self::Updated { chat_id, .. }
            | Self::Deleted { chat_id, .. } => *chat_id,
        }
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Created { timestamp, .. }
            | Self::Updated { timestamp, .. }
            | Self::Deleted { timestamp, .. } => *timestamp,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    fn messages(&self) -> &[Message] {
        match self {
            Self::Created {
                initial_messages, ..
            } => initial_messages,
            Self::Updated {
                messages_to_add, ..
            } => messages_to_add,
            Self::Deleted { .. } => &[],
        }
    }
}

/// One page of changes between two cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatListDelta {
    pub changes: Vec<ChatDelta>,
    /// `None` means full resynchronization: the local replica is discarded first.
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: DateTime<Utc>,
    /// The caller must immediately re-request from `to_timestamp`.
    pub has_more_changes: bool,
}

impl ChatListDelta {
    /// A page with no changes
    #[must_use]
    pub const fn empty(
        from_timestamp: Option<DateTime<Utc>>,
        to_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            changes: Vec::new(),
            from_timestamp,
            to_timestamp,
            has_more_changes: false,
        }
    }

    pub const fn is_full_resync(&self) -> bool {
        self.from_timestamp.is_none()
    }

    /// Check cursor ordering and that every change is self-consistent.
    ///
    /// Change timestamps must be non-decreasing and must not run past
    /// `to_timestamp`; messages must belong to the chat they are delivered with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(from) = self.from_timestamp {
            if from > self.to_timestamp {
                return Err(ValidationError::new(
                    "from_timestamp",
                    "must not be later than to_timestamp",
                ));
            }
        }

        let mut previous: Option<DateTime<Utc>> = None;
        for (index, change) in self.changes.iter().enumerate() {
            let timestamp = change.timestamp();
            if previous.is_some_and(|previous| timestamp < previous) {
                return Err(ValidationError::new(
                    format!("changes[{index}].timestamp"),
                    "must not be earlier than the preceding change",
                ));
            }
            if timestamp > self.to_timestamp {
                return Err(ValidationError::new(
                    format!("changes[{index}].timestamp"),
                    "must not be later than to_timestamp",
                ));
            }
            let chat_id = change.chat_id();
            if let Some(position) = change
                .messages()
                .iter()
                .position(|message| message.chat_id != chat_id)
            {
                return Err(ValidationError::new(
                    format!("changes[{index}].messages[{position}].chat_id"),
                    format!("must equal {chat_id}"),
                ));
            }
            previous = Some(timestamp);
        }
        Ok(())
    }
}
