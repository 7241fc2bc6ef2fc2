//! Message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::uuid_id;
use super::{ChatId, ParticipantId};
use crate::error::ValidationError;

/// Maximum message length in characters
pub const MAX_TEXT_LENGTH: usize = 2000;

uuid_id!(
    /// Identifier of a message, generated by the sending client
    MessageId
);

/// Delivery progress of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeliveryStatus {
    /// Upload in progress, 0 to 100 percent
    Sending { progress: u8 },
    /// Delivery attempt failed and may be retried
    Failed { reason: String },
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sending { .. } => "sending",
            Self::Failed { .. } => "failed",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

/// A text message in a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    pub sender: ParticipantId,
    pub chat_id: ChatId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
}

impl Message {
    /// Create a new unsent message
    #[must_use]
    pub fn new(
        chat_id: ChatId,
        sender: ParticipantId,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            parent_id: None,
            sender,
            chat_id,
            text: text.into(),
            created_at,
            sent_at: None,
            delivered_at: None,
            edited_at: None,
            delivery_status: None,
        }
    }

    /// Mark this message as a reply
    #[must_use]
    pub const fn in_reply_to(mut self, parent: MessageId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Check text length and timestamp ordering.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.text)?;
        if let Some(edited_at) = self.edited_at {
            if edited_at < self.created_at {
                return Err(ValidationError::new(
                    "edited_at",
                    "must not be earlier than created_at",
                ));
            }
        }
        Ok(())
    }
}

/// Message text must be non-blank and at most [`MAX_TEXT_LENGTH`] characters.
pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::new("text", "must not be empty"));
    }
    let length = text.chars().count();
    if length > MAX_TEXT_LENGTH {
        return Err(ValidationError::new(
            "text",
            format!("length {length} exceeds maximum of {MAX_TEXT_LENGTH} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(text: &str) -> Message {
        Message::new(ChatId::new(), ParticipantId::new(), text, Utc::now())
    }

    #[test]
    fn test_message_id_parses_and_serializes_as_plain_uuid() {
        let id = MessageId::new();
        assert_eq!(id.to_string().parse::<MessageId>().unwrap(), id);
        assert_eq!(
            serde_json::to_value(id).unwrap(),
            serde_json::Value::String(id.as_str())
        );
        assert!("not-a-uuid".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_text() {
        let error = message("   ").validate().unwrap_err();
        assert_eq!(error.field, "text");
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        let at_limit = "ж".repeat(MAX_TEXT_LENGTH);
        assert!(message(&at_limit).validate().is_ok());

        let over_limit = "a".repeat(MAX_TEXT_LENGTH + 1);
        let error = message(&over_limit).validate().unwrap_err();
        assert_eq!(error.field, "text");
        assert!(error.reason.contains("2001"));
    }

    #[test]
    fn test_validate_rejects_edit_before_creation() {
        let mut msg = message("hello");
        msg.edited_at = Some(msg.created_at - Duration::seconds(1));
        assert_eq!(msg.validate().unwrap_err().field, "edited_at");
    }

    #[test]
    fn test_delivery_status_wire_shape() {
        let json = serde_json::to_string(&DeliveryStatus::Sending { progress: 40 }).unwrap();
        assert_eq!(json, r#"{"type":"sending","progress":40}"#);
        let parsed: DeliveryStatus = serde_json::from_str(r#"{"type":"read"}"#).unwrap();
        assert_eq!(parsed, DeliveryStatus::Read);
    }
}
