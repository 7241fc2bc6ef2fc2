use std::io;

use courier_core::error::{StorageError, SyncError};
use courier_core::messaging::MessageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] courier_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid {kind} ID '{value}'")]
    InvalidId { kind: &'static str, value: String },
    #[error("Unknown setting key '{0}'")]
    UnknownSettingKey(String),
    #[error("Message text cannot be empty")]
    EmptyText,
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
}
