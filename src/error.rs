//! Error types for the storage engine and the `Storage` facade.

use crate::types::PageId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by the engine (page store, B-tree, transactions)
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page lies beyond the end of the file
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// Node does not have enough space for the operation
    #[error("Page is full, need {needed} bytes but only {available} available")]
    PageFull { needed: usize, available: usize },

    /// Keys must contain at least one byte
    #[error("Key must not be empty")]
    EmptyKey,

    /// Key exceeds maximum allowed size
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value exceeds maximum allowed size
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    /// Another handle holds the file lock
    #[error("Timed out after {waited:?} waiting for the lock on {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The store has been closed
    #[error("Database is closed")]
    Closed,

    /// Write attempted through a read-only handle
    #[error("Database is opened read-only")]
    ReadOnly,

    /// The file was created for a different bucket
    #[error("Bucket mismatch: file holds {found:?}, expected {expected:?}")]
    BucketMismatch { expected: String, found: String },

    /// A read-only open found no bucket to read
    #[error("Bucket {0:?} not found")]
    BucketNotFound(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }
}

/// Boxed error returned by `for_each` visitors
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the [`Storage`](crate::Storage) facade, one variant
/// per operation class.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lock timeout, permission problem, or unreadable/corrupt file
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// `set`/`delete` failed; the previous commit is still in force
    #[error("write failed: {0}")]
    Write(#[source] StorageError),

    /// `get` failed (never raised for a missing key)
    #[error("read failed: {0}")]
    Read(#[source] StorageError),

    /// `for_each` failed while scanning
    #[error("iteration failed: {0}")]
    Iteration(#[source] StorageError),

    /// Error produced by a `for_each` visitor, passed through unchanged
    #[error(transparent)]
    Callback(CallbackError),

    /// Flush or unlock failed while closing
    #[error("close failed: {0}")]
    Close(#[source] StorageError),
}

impl StoreError {
    /// Wrap a visitor error
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<CallbackError>,
    {
        Self::Callback(err.into())
    }

    /// The engine error behind this failure, if any
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Write(e) | Self::Read(e) | Self::Iteration(e) | Self::Close(e) => Some(e),
            Self::Callback(_) => None,
        }
    }

    /// Whether the operation failed because the store was closed
    pub fn is_closed(&self) -> bool {
        matches!(self.storage_error(), Some(StorageError::Closed))
    }
}
