//! In-memory multi-version row store.

use crate::cell::{Cell, Timestamp};
use crate::error::StorageResult;
use crate::filter::{CellFilter, ReturnCode};
use crate::lock::RowLockTable;
use crate::operation::{Get, Put, Read, Scan, TimeRange};
use crate::store::{RowIter, RowLock, RowResult, RowStore};
use bytes::Bytes;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default time a writer waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Versions of one column, newest first.
type Versions = BTreeMap<Reverse<Timestamp>, Bytes>;
/// Columns of one row keyed by (family, qualifier).
type Columns = BTreeMap<(Bytes, Bytes), Versions>;

/// An in-memory multi-version row store.
///
/// This store keeps every version of every column in memory and is
/// suitable for:
/// - Unit and integration tests
/// - Embedded use where durability of user data is handled elsewhere
///
/// Puts without an explicit timestamp are stamped from a store-local
/// logical clock, so later writes always produce newer versions.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads. Row locks
/// come from a sharded [`RowLockTable`]; filters run without any store
/// lock held, so a filter may itself read other stores.
///
/// # Example
///
/// ```rust
/// use sitx_storage::{Get, InMemoryStore, Put, RowStore};
///
/// let store = InMemoryStore::new();
/// store.put(&Put::new("r1").add("f", "q", "v1")).unwrap();
/// let cells = store.get(&Get::new("r1"), None).unwrap();
/// assert_eq!(cells[0].value().as_ref(), b"v1");
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    rows: RwLock<BTreeMap<Bytes, Columns>>,
    locks: RowLockTable,
    clock: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a new empty store with a custom lock timeout.
    #[must_use]
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            locks: RowLockTable::new(timeout),
            clock: AtomicU64::new(1),
        }
    }

    /// Returns the number of rows holding at least one version.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns every stored version of a row, unfiltered.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn raw_row(&self, row: &[u8]) -> Vec<Cell> {
        self.rows
            .read()
            .get(row)
            .map(|columns| snapshot_row(row, columns, &[], TimeRange::all()))
            .unwrap_or_default()
    }

    /// Returns true if some lock currently holds the row.
    #[must_use]
    pub fn is_locked(&self, row: &[u8]) -> bool {
        self.locks.is_locked(row)
    }

    fn apply(&self, put: &Put) {
        let default_ts = self.clock.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write();
        let columns = rows.entry(put.row().clone()).or_default();
        for value in put.values() {
            let ts = value.timestamp.unwrap_or(default_ts);
            columns
                .entry((value.family.clone(), value.qualifier.clone()))
                .or_default()
                .insert(Reverse(ts), value.value.clone());
        }
    }
}

/// Copies the candidate cells of a row out from under the store lock.
fn snapshot_row(row: &[u8], columns: &Columns, families: &[Bytes], range: TimeRange) -> Vec<Cell> {
    let row = Bytes::copy_from_slice(row);
    columns
        .iter()
        .filter(|((family, _), _)| families.is_empty() || families.contains(family))
        .flat_map(|((family, qualifier), versions)| {
            let row = row.clone();
            versions
                .iter()
                .filter(move |(Reverse(ts), _)| range.contains(*ts))
                .map(move |(Reverse(ts), value)| {
                    Cell::new(row.clone(), family.clone(), qualifier.clone(), *ts, value.clone())
                })
        })
        .collect()
}

/// Runs a row's candidate cells through the filter and version limit.
fn filter_row<'f>(
    candidates: Vec<Cell>,
    max_versions: usize,
    mut filter: Option<&mut (dyn CellFilter + 'f)>,
) -> StorageResult<Vec<Cell>> {
    if let Some(f) = filter.as_deref_mut() {
        f.reset();
    }

    let mut out = Vec::new();
    let mut included = 0usize;
    let mut skip_column: Option<Cell> = None;
    let mut previous: Option<Cell> = None;

    for cell in candidates {
        if previous.as_ref().map_or(true, |p| !p.same_column(&cell)) {
            included = 0;
        }
        previous = Some(cell.clone());

        if skip_column.as_ref().is_some_and(|s| s.same_column(&cell)) {
            continue;
        }
        if included >= max_versions {
            continue;
        }

        let code = match filter.as_deref_mut() {
            Some(f) => f.filter_cell(&cell)?,
            None => ReturnCode::Include,
        };
        match code {
            ReturnCode::Include => {
                included += 1;
                out.push(cell);
            }
            ReturnCode::Skip | ReturnCode::SeekNextUsingHint => {}
            ReturnCode::NextCol => skip_column = Some(cell),
            ReturnCode::NextRow => break,
        }
    }
    Ok(out)
}

impl RowStore for InMemoryStore {
    fn get(&self, get: &Get, filter: Option<&mut dyn CellFilter>) -> StorageResult<Vec<Cell>> {
        let candidates = {
            let rows = self.rows.read();
            match rows.get(get.row()) {
                Some(columns) => snapshot_row(get.row(), columns, get.families(), get.time_range()),
                None => return Ok(Vec::new()),
            }
        };
        filter_row(candidates, get.max_versions(), filter)
    }

    fn put(&self, put: &Put) -> StorageResult<()> {
        match put.lock() {
            Some(lock) => {
                if lock.row() != put.row() {
                    return Err(crate::StorageError::LockNotHeld {
                        row: crate::to_string_binary(put.row()),
                        lock_id: lock.lock_id(),
                    });
                }
                self.locks.validate(lock)?;
                self.apply(put);
            }
            None => {
                let lock = self.locks.acquire(put.row())?;
                self.apply(put);
                self.locks.release(&lock)?;
            }
        }
        Ok(())
    }

    fn scan(&self, scan: &Scan, mut filter: Option<&mut dyn CellFilter>) -> StorageResult<RowIter> {
        let upper = match scan.end() {
            Some(end) if end <= scan.start() => return Ok(Vec::new().into_iter()),
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        let candidates: Vec<(Bytes, Vec<Cell>)> = {
            let rows = self.rows.read();
            rows.range((Bound::Included(scan.start().clone()), upper))
                .map(|(row, columns)| {
                    (
                        row.clone(),
                        snapshot_row(row, columns, scan.families(), scan.time_range()),
                    )
                })
                .collect()
        };

        let mut results = Vec::new();
        for (row, cells) in candidates {
            let cells = filter_row(cells, scan.max_versions(), filter.as_deref_mut())?;
            if !cells.is_empty() {
                results.push(RowResult { row, cells });
            }
        }
        Ok(results.into_iter())
    }

    fn lock_row(&self, row: &[u8]) -> StorageResult<RowLock> {
        self.locks.acquire(row)
    }

    fn unlock_row(&self, lock: &RowLock) -> StorageResult<()> {
        self.locks.release(lock)
    }
}
