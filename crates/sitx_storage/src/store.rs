//! Row store trait definition.

use crate::cell::Cell;
use crate::error::StorageResult;
use crate::filter::CellFilter;
use crate::operation::{Get, Put, Scan};
use bytes::Bytes;

/// Handle on an exclusive row lock.
///
/// The handle carries a fencing token: a store only honours a put made under
/// a lock while that exact lock is still held. Handles are cheap to clone;
/// cloning does not duplicate the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLock {
    row: Bytes,
    lock_id: u64,
}

impl RowLock {
    /// Creates a lock handle. Only stores should call this.
    #[must_use]
    pub fn new(row: Bytes, lock_id: u64) -> Self {
        Self { row, lock_id }
    }

    /// Returns the locked row.
    #[must_use]
    pub fn row(&self) -> &Bytes {
        &self.row
    }

    /// Returns the fencing token.
    #[must_use]
    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }
}

/// All cells a read returned for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowResult {
    /// The row key.
    pub row: Bytes,
    /// Cells in column order, newest version first within a column.
    pub cells: Vec<Cell>,
}

/// Iterator over the rows of a scan.
pub type RowIter = std::vec::IntoIter<RowResult>;

/// A sorted, multi-version row store.
///
/// This is the narrow surface the transactional layer needs from the
/// underlying storage: versioned get/put/scan with per-cell filter
/// callbacks, plus blocking exclusive row locks.
///
/// # Invariants
///
/// - A put is atomic with respect to its row
/// - A put made under a [`RowLock`] is rejected unless that lock still holds the row
/// - A put made without a lock waits for any lock on its row
/// - Locks on different rows never block each other
/// - Implementations must be `Send + Sync` for concurrent access
pub trait RowStore: Send + Sync {
    /// Reads one row, passing every candidate cell through `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter fails or an I/O error occurs.
    fn get(&self, get: &Get, filter: Option<&mut dyn CellFilter>) -> StorageResult<Vec<Cell>>;

    /// Writes the columns of a put atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The put carries a lock that no longer holds the row
    /// - Waiting for the row lock times out
    /// - An I/O error occurs
    fn put(&self, put: &Put) -> StorageResult<()>;

    /// Reads a range of rows, passing every candidate cell through `filter`.
    ///
    /// Rows for which no cell survives are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter fails or an I/O error occurs.
    fn scan(&self, scan: &Scan, filter: Option<&mut dyn CellFilter>) -> StorageResult<RowIter>;

    /// Acquires an exclusive lock on a row, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`](crate::StorageError::LockTimeout)
    /// if the lock cannot be acquired within the store's timeout.
    fn lock_row(&self, row: &[u8]) -> StorageResult<RowLock>;

    /// Releases a row lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle does not hold its row.
    fn unlock_row(&self, lock: &RowLock) -> StorageResult<()>;
}
