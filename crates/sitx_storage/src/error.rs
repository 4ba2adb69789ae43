//! Error types for storage operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A row lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for lock on row {row}")]
    LockTimeout {
        /// The row that was being locked (printable form).
        row: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// An operation presented a lock handle that does not hold the row.
    #[error("lock {lock_id} does not hold row {row}")]
    LockNotHeld {
        /// The row the operation targeted (printable form).
        row: String,
        /// Fencing token of the presented lock.
        lock_id: u64,
    },

    /// A scan filter callback failed.
    #[error("filter error: {0}")]
    Filter(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Wraps a filter callback error.
    pub fn filter(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Filter(Box::new(error))
    }

    /// Returns true if the caller may retry the operation.
    ///
    /// Lock timeouts and I/O failures are transient; everything else
    /// indicates a caller bug or corruption.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::LockTimeout { .. })
    }
}
