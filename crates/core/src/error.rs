//! Error types for gitstore
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Corruption variants (`BadBlock`, `BadRecord`) exist so diagnostics can be
//! reported, but read paths record them on the dataset instead of returning them.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gitstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for gitstore
#[derive(Debug, Error)]
pub enum Error {
    /// The model's own validation hook rejected it
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Record id does not have exactly three `/`-separated segments
    #[error("invalid record id: {0}")]
    InvalidId(String),

    /// Record does not exist in its block
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Dataset has no records
    #[error("no records found in {0}")]
    NoRecords(String),

    /// Remote rejected our credentials
    #[error("access was denied to online repository")]
    AccessDenied,

    /// Pull or push against the remote failed
    #[error("database sync failed: {0}")]
    SyncFailed(String),

    /// Power level below the configured floor; syncing disabled
    #[error("insufficient battery power, syncing disabled")]
    LowBattery,

    /// No online remote configured; syncing disabled
    #[error("online remote is not set, syncing disabled")]
    NoOnlineRemote,

    /// Advisory lock marker already present
    #[error("lock already exists: {}", .0.display())]
    LockAlreadyExists(PathBuf),

    /// Model does not name any lock markers
    #[error("model {0} is not lockable")]
    NotLockable(String),

    /// Connection has been closed
    #[error("connection is closed")]
    ConnectionClosed,

    /// Connection was never opened through a connection manager
    #[error("connection is not valid: {0}")]
    ConnectionInvalid(String),

    /// Block file is not a valid JSON object of strings
    #[error("bad block: {}", .0.display())]
    BadBlock(PathBuf),

    /// Record payload is not valid JSON
    #[error("bad record: {0}")]
    BadRecord(String),

    /// Record envelope carries a version tag we do not understand
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(String),

    /// Invalid argument or configuration
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Version-control backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Encryption or decryption failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file operations, process spawn, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    /// True for errors that mean the record simply is not there
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RecordNotFound(_) | Error::NoRecords(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_id() {
        let err = Error::InvalidId("a/b".to_string());
        let msg = err.to_string();
        assert!(msg.contains("invalid record id"));
        assert!(msg.contains("a/b"));
    }

    #[test]
    fn test_error_display_lock_exists() {
        let err = Error::LockAlreadyExists(PathBuf::from("/tmp/Lock/room_1"));
        assert!(err.to_string().contains("room_1"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::RecordNotFound("x".into()).is_not_found());
        assert!(Error::NoRecords("Message".into()).is_not_found());
        assert!(!Error::AccessDenied.is_not_found());
    }
}
