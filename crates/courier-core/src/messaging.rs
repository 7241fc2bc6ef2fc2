//! Sending and editing messages against the local replica's chat rules.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::delivery::{self, TransitionError};
use crate::error::{RemoteError, StorageError, ValidationError};
use crate::models::{Chat, ChatId, DeliveryStatus, Message, MessageId, ParticipantId, Rule};
use crate::services::LocalStore;

/// Uploads a message and reports its delivery progress.
///
/// Each item is a snapshot of the message as the server currently sees it.
/// The channel closes when delivery reaches a final state.
pub trait MessageTransport: Send + Sync + 'static {
    fn send_message(&self, message: Message) -> mpsc::Receiver<Result<Message, RemoteError>>;

    fn edit_message(&self, message: Message) -> mpsc::Receiver<Result<Message, RemoteError>>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Chat {0} is not in the local replica")]
    ChatNotFound(ChatId),

    #[error("Message {0} is not in the local replica")]
    MessageNotFound(MessageId),

    #[error("Sender {0} is not a participant of this chat")]
    NotAParticipant(ParticipantId),

    #[error("New participants must wait {}ms before writing", remaining.as_millis())]
    WaitAfterJoining { remaining: Duration },

    #[error("Must wait {}ms before sending another message", remaining.as_millis())]
    WaitDebounce { remaining: Duration },

    #[error("Edit window has expired")]
    EditWindowExpired,

    #[error("Sender cannot be changed by an edit")]
    SenderIdChanged,

    #[error("Recipient chat cannot be changed by an edit")]
    RecipientChanged,

    #[error("Creation time cannot be changed by an edit")]
    CreationTimeChanged,

    #[error("Message is not valid: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Message already has delivery status {0:?}")]
    DeliveryStatusAlreadySet(DeliveryStatus),

    #[error("Invalid delivery status update: {0}")]
    DeliveryStatusUpdateNotValid(#[from] TransitionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upload {
    Send,
    Edit,
}

pub struct MessageFlow<T, C = SystemClock> {
    store: LocalStore,
    transport: Arc<T>,
    clock: C,
}

impl<T: MessageTransport> MessageFlow<T, SystemClock> {
    pub const fn new(store: LocalStore, transport: Arc<T>) -> Self {
        Self::with_clock(store, transport, SystemClock)
    }
}

impl<T: MessageTransport, C: Clock> MessageFlow<T, C> {
    pub const fn with_clock(store: LocalStore, transport: Arc<T>, clock: C) -> Self {
        Self {
            store,
            transport,
            clock,
        }
    }

    /// Send a new message. `on_progress` sees every accepted snapshot.
    ///
    /// Returns the last accepted snapshot.
    pub async fn send(
        &self,
        message: Message,
        on_progress: impl FnMut(&Message),
    ) -> Result<Message, MessageError> {
        let chat = self.local_chat(message.chat_id).await?;
        let now = self.clock.now();
        for rule in &chat.metadata.rules {
            match rule {
                Rule::CanNotWriteAfterJoining { duration_millis } => {
                    check_joining(&chat, &message, now, *duration_millis)?;
                }
                Rule::Debounce { delay_millis } => {
                    self.check_debounce(&message, now, *delay_millis).await?;
                }
                _ => {}
            }
        }

        self.upload(Upload::Send, message, on_progress).await
    }

    /// Edit a message already in the local replica.
    pub async fn edit(
        &self,
        message: Message,
        on_progress: impl FnMut(&Message),
    ) -> Result<Message, MessageError> {
        let chat = self.local_chat(message.chat_id).await?;
        let original = self
            .store
            .get_message(message.id)
            .await?
            .ok_or(MessageError::MessageNotFound(message.id))?;
        let now = self.clock.now();

        for rule in &chat.metadata.rules {
            match rule {
                Rule::EditWindow { duration_millis } => {
                    if now - original.created_at > millis(*duration_millis) {
                        return Err(MessageError::EditWindowExpired);
                    }
                }
                Rule::SenderIdCanNotChange if original.sender != message.sender => {
                    return Err(MessageError::SenderIdChanged);
                }
                Rule::RecipientCanNotChange if original.chat_id != message.chat_id => {
                    return Err(MessageError::RecipientChanged);
                }
                Rule::CreationTimeCanNotChange if original.created_at != message.created_at => {
                    return Err(MessageError::CreationTimeChanged);
                }
                _ => {}
            }
        }

        self.upload(Upload::Edit, message, on_progress).await
    }

    async fn local_chat(&self, chat_id: ChatId) -> Result<Chat, MessageError> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or(MessageError::ChatNotFound(chat_id))
    }

    async fn check_debounce(
        &self,
        message: &Message,
        now: DateTime<Utc>,
        delay_millis: u64,
    ) -> Result<(), MessageError> {
        let last_by_sender = self
            .store
            .list_messages(message.chat_id)
            .await?
            .into_iter()
            .filter(|existing| existing.sender == message.sender && existing.id != message.id)
            .map(|existing| existing.created_at)
            .max();

        let Some(last) = last_by_sender else {
            return Ok(());
        };
        let delay = millis(delay_millis);
        let elapsed = now - last;
        if elapsed < delay {
            return Err(MessageError::WaitDebounce {
                remaining: remaining(delay, elapsed),
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        kind: Upload,
        message: Message,
        mut on_progress: impl FnMut(&Message),
    ) -> Result<Message, MessageError> {
        message.validate()?;
        if let Some(status) = &message.delivery_status {
            return Err(MessageError::DeliveryStatusAlreadySet(status.clone()));
        }

        let message_id = message.id;
        let mut updates = match kind {
            Upload::Send => self.transport.send_message(message.clone()),
            Upload::Edit => self.transport.edit_message(message.clone()),
        };

        let mut last = message;
        while let Some(update) = updates.recv().await {
            let snapshot = update?;
            delivery::validate(
                last.delivery_status.as_ref(),
                snapshot.delivery_status.as_ref(),
            )?;
            self.store.save_message(&snapshot).await?;
            tracing::debug!(
                message_id = %message_id,
                status = ?snapshot.delivery_status,
                "Delivery progress"
            );
            on_progress(&snapshot);
            last = snapshot;
        }
        Ok(last)
    }
}

fn check_joining(
    chat: &Chat,
    message: &Message,
    now: DateTime<Utc>,
    duration_millis: u64,
) -> Result<(), MessageError> {
    let joined_at = chat
        .metadata
        .participants
        .iter()
        .find(|participant| participant.id == message.sender)
        .map(|participant| participant.joined_at)
        .ok_or(MessageError::NotAParticipant(message.sender))?;

    let wait = millis(duration_millis);
    let elapsed = now - joined_at;
    if elapsed < wait {
        return Err(MessageError::WaitAfterJoining {
            remaining: remaining(wait, elapsed),
        });
    }
    Ok(())
}

fn millis(value: u64) -> TimeDelta {
    TimeDelta::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn remaining(total: TimeDelta, elapsed: TimeDelta) -> Duration {
    (total - elapsed).to_std().unwrap_or_default()
}
