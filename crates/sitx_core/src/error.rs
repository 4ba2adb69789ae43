//! Error types for sitx core.

use crate::transaction::TransactionStatus;
use sitx_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in sitx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error (I/O, lock timeout, stale lock).
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// I/O error outside the row store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another transaction wrote the row in a way that invalidates this
    /// transaction's snapshot. The writer has been marked ERROR.
    #[error("write/write conflict on row {row} for transaction {transaction_id}")]
    WriteConflict {
        /// The writing transaction.
        transaction_id: u64,
        /// The contended row (printable form).
        row: String,
    },

    /// A commit that decides visibility did not settle in time.
    #[error("commit of transaction {transaction_id} still in progress")]
    CommitPending {
        /// The committing transaction.
        transaction_id: u64,
    },

    /// A commit failed after it started; the transaction has been marked
    /// ERROR and cannot be committed again.
    #[error("commit of transaction {transaction_id} failed: {source}")]
    CommitFailed {
        /// The transaction.
        transaction_id: u64,
        /// What stopped the commit.
        #[source]
        source: Box<CoreError>,
    },

    /// Lifecycle operation on a transaction that is no longer ACTIVE.
    #[error("transaction is not ACTIVE: {transaction_id} is {status}")]
    NotActive {
        /// The transaction.
        transaction_id: u64,
        /// Its current status.
        status: TransactionStatus,
    },

    /// Write under a transaction that does not allow writes.
    #[error("transaction is read only: {transaction_id}")]
    ReadOnly {
        /// The transaction.
        transaction_id: u64,
    },

    /// The transaction store refused a status change.
    #[error("illegal status transition for transaction {transaction_id}: {from} -> {to}")]
    IllegalTransition {
        /// The transaction.
        transaction_id: u64,
        /// Status on record.
        from: TransactionStatus,
        /// Requested status.
        to: TransactionStatus,
    },

    /// No transaction record exists for an id.
    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        /// The missing transaction.
        transaction_id: u64,
    },

    /// A transaction record already exists for an id.
    #[error("transaction already exists: {transaction_id}")]
    TransactionExists {
        /// The duplicate transaction.
        transaction_id: u64,
    },

    /// A string could not be parsed as a transaction id.
    #[error("invalid transaction id: {input:?}")]
    InvalidTransactionId {
        /// The rejected input.
        input: String,
    },

    /// The timestamp source ran out of timestamps.
    #[error("timestamp source exhausted")]
    TimestampExhausted,

    /// The timestamp source is unavailable.
    #[error("timestamp source unavailable: {message}")]
    TimestampSource {
        /// Description of the failure.
        message: String,
    },

    /// A stored transaction record is malformed.
    #[error("corrupted transaction data: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        // Errors raised by a visibility filter travel through the store
        // boxed; hand them back in their original form.
        match err {
            StorageError::Filter(inner) => match inner.downcast::<CoreError>() {
                Ok(core) => *core,
                Err(other) => Self::Storage(StorageError::Filter(other)),
            },
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Creates a not-active error.
    pub fn not_active(transaction_id: u64, status: TransactionStatus) -> Self {
        Self::NotActive {
            transaction_id,
            status,
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a timestamp source error.
    pub fn timestamp_source(message: impl Into<String>) -> Self {
        Self::TimestampSource {
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the failed operation as is.
    ///
    /// Only resource failures (lock timeouts, I/O, a slow commit) are
    /// retryable. A write conflict or a failed commit requires restarting
    /// the whole transaction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            Self::Io(_) | Self::CommitPending { .. } => true,
            _ => false,
        }
    }

    /// Returns true for write/write conflicts.
    #[must_use]
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }
}
