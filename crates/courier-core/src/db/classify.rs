//! Classification of raw `SQLite` failures into storage faults.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::error::StorageError;

/// A single failed storage call, before any retry decision is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageFault {
    /// Another connection holds the lock
    #[error("database is locked")]
    Locked,

    #[error("database disk image is malformed")]
    Corrupt,

    #[error("access to database denied")]
    AccessDenied,

    #[error("attempt to write a readonly database")]
    ReadOnly,

    #[error("database or disk is full")]
    Full,

    #[error("disk I/O error")]
    DiskIo,

    #[error("{0}")]
    Other(String),
}

impl StorageFault {
    /// Lock contention is the only fault worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// Transient faults map to `ConcurrentModification`; callers that must not
/// retry pick a different transient error themselves.
impl From<StorageFault> for StorageError {
    fn from(fault: StorageFault) -> Self {
        match fault {
            StorageFault::Locked => Self::ConcurrentModification,
            StorageFault::Corrupt => Self::Corrupted,
            StorageFault::AccessDenied => Self::AccessDenied,
            StorageFault::ReadOnly => Self::ReadOnly,
            StorageFault::Full => Self::StorageFull,
            StorageFault::DiskIo => Self::DiskIo,
            StorageFault::Other(message) => Self::Unknown(message),
        }
    }
}

impl From<rusqlite::Error> for StorageFault {
    fn from(error: rusqlite::Error) -> Self {
        classify(&error)
    }
}

/// Map a `rusqlite` error to a [`StorageFault`].
pub fn classify(error: &rusqlite::Error) -> StorageFault {
    if let Some(code) = error.sqlite_error_code() {
        match code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => return StorageFault::Locked,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => return StorageFault::Corrupt,
            ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied => {
                return StorageFault::AccessDenied
            }
            ErrorCode::ReadOnly => return StorageFault::ReadOnly,
            ErrorCode::DiskFull => return StorageFault::Full,
            ErrorCode::SystemIoFailure => return StorageFault::DiskIo,
            _ => {}
        }
    }

    // Drivers and wrappers sometimes only keep the message text
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("database is locked") || lowered.contains("database is busy") {
        StorageFault::Locked
    } else if lowered.contains("malformed") || lowered.contains("file is not a database") {
        StorageFault::Corrupt
    } else {
        StorageFault::Other(message)
    }
}

#[cfg(test)]
pub(crate) fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn test_busy_and_locked_are_transient() {
        assert_eq!(classify(&sqlite_failure(ffi::SQLITE_BUSY)), StorageFault::Locked);
        assert_eq!(classify(&sqlite_failure(ffi::SQLITE_LOCKED)), StorageFault::Locked);
        assert!(StorageFault::Locked.is_transient());
    }

    #[test]
    fn test_permanent_codes_keep_their_kind() {
        let cases = [
            (ffi::SQLITE_CORRUPT, StorageError::Corrupted),
            (ffi::SQLITE_NOTADB, StorageError::Corrupted),
            (ffi::SQLITE_PERM, StorageError::AccessDenied),
            (ffi::SQLITE_READONLY, StorageError::ReadOnly),
            (ffi::SQLITE_FULL, StorageError::StorageFull),
            (ffi::SQLITE_IOERR, StorageError::DiskIo),
        ];
        for (code, expected) in cases {
            let fault = classify(&sqlite_failure(code));
            assert!(!fault.is_transient(), "{fault:?} must not be retried");
            assert_eq!(StorageError::from(fault), expected);
        }
    }

    #[test]
    fn test_message_text_fallback() {
        let error = rusqlite::Error::InvalidParameterName("database is locked".to_string());
        assert_eq!(classify(&error), StorageFault::Locked);

        let error = rusqlite::Error::InvalidQuery;
        assert!(matches!(classify(&error), StorageFault::Other(_)));
    }
}
