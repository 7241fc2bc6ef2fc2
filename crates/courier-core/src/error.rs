//! Error types for courier-core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using courier-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or configuring courier-core components
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage failure surfaced by a store operation
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Synchronization failure
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Local storage failures, split into transient and permanent kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Lock contention persisted past the retry budget
    #[error("Local storage is busy: concurrent modification")]
    ConcurrentModification,

    /// Lock contention on an operation that is never retried
    #[error("Local storage is temporarily unavailable")]
    TemporarilyUnavailable,

    /// Database file is corrupted
    #[error("Local database is corrupted")]
    Corrupted,

    /// Insufficient permissions for the database file
    #[error("Access to local storage was denied")]
    AccessDenied,

    /// Database was opened read-only
    #[error("Local database is read-only")]
    ReadOnly,

    /// No space left for the write
    #[error("Local storage is full")]
    StorageFull,

    /// Disk I/O failure
    #[error("Disk I/O error in local storage")]
    DiskIo,

    /// Anything the classifier does not recognize
    #[error("Unknown storage error: {0}")]
    Unknown(String),
}

impl StorageError {
    /// Whether waiting briefly might make the same operation succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification | Self::TemporarilyUnavailable)
    }
}

/// Errors reported by the remote authority or on the way to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No network connection
    #[error("Network is not available")]
    NetworkNotAvailable,

    /// Server could not be reached
    #[error("Server is unreachable")]
    ServerUnreachable,

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Server failed to process the request or returned a malformed payload
    #[error("Server error")]
    ServerError,

    /// Too many requests
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Server asks the client to wait before retrying
    #[error("Cooldown active for {}ms", remaining.as_millis())]
    CooldownActive {
        /// Time left before the next request is accepted
        remaining: Duration,
    },

    /// Authorization failed
    #[error("Unauthorized")]
    Unauthorized,

    /// Referenced chat does not exist on the server
    #[error("Chat not found")]
    ChatNotFound,

    /// Referenced message does not exist on the server
    #[error("Message not found")]
    MessageNotFound,

    /// Error code this client does not know about
    #[error("Unknown service error {code}: {message}")]
    Unknown {
        /// Raw wire code
        code: String,
        /// Raw message, kept for diagnostics
        message: String,
    },
}

impl RemoteError {
    /// Connectivity failures end a poll subscription and wait for re-subscription.
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NetworkNotAvailable | Self::ServerUnreachable | Self::Timeout
        )
    }
}

/// A malformed field value rejected before any storage or network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {reason}")]
pub struct ValidationError {
    /// Offending field, e.g. `text` or `changes[2].timestamp`
    pub field: String,
    /// Why the value was rejected
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the synchronization subsystems.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Remote sync failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local storage failed during sync: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_transient_classification() {
        assert!(StorageError::ConcurrentModification.is_transient());
        assert!(StorageError::TemporarilyUnavailable.is_transient());
        assert!(!StorageError::Corrupted.is_transient());
        assert!(!StorageError::DiskIo.is_transient());
        assert!(!StorageError::StorageFull.is_transient());
    }

    #[test]
    fn validation_error_names_field() {
        let error = ValidationError::new("text", "must not be empty");
        assert_eq!(error.to_string(), "Invalid text: must not be empty");
    }

    #[test]
    fn cooldown_message_includes_remaining_time() {
        let error = RemoteError::CooldownActive {
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(error.to_string(), "Cooldown active for 1500ms");
        assert!(!error.is_connectivity());
        assert!(RemoteError::Timeout.is_connectivity());
    }
}
