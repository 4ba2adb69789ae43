//! Test fixtures and transactor helpers.
//!
//! Provides a ready-made transactor over in-memory stores, plus shorthand
//! for the single-column reads and writes most tests need.

use bytes::Bytes;
use sitx_core::{
    CoreResult, PersistentTimestampSource, SiTransactor, SimpleTimestampSource, TimestampSource,
    TransactionId, TransactionStatus, TransactionalTable, TransactorConfig,
};
use sitx_storage::{Get, InMemoryStore, Put, Scan};
use std::sync::Arc;
use tempfile::TempDir;

/// Column family used by the fixture helpers.
pub const FAMILY: &str = "attributes";

/// Column qualifier used by the fixture helpers.
pub const QUALIFIER: &str = "value";

/// A transactor guarding one in-memory data table.
pub struct TestTransactor {
    /// The transactor.
    pub transactor: Arc<SiTransactor>,
    /// The guarded data table.
    pub table: TransactionalTable,
    /// Raw access to the data table, bypassing the transactor.
    pub data: Arc<InMemoryStore>,
    /// Raw access to the transaction table.
    pub transactions: Arc<InMemoryStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestTransactor {
    /// Creates a fixture with an in-process timestamp counter.
    pub fn memory() -> Self {
        Self::with_config(TransactorConfig::default())
    }

    /// Creates a fixture with an in-process timestamp counter and the given
    /// configuration.
    pub fn with_config(config: TransactorConfig) -> Self {
        Self::build(config, Arc::new(SimpleTimestampSource::new()), None)
    }

    /// Creates a fixture whose timestamps come from a file in a temporary
    /// directory.
    pub fn persistent() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = PersistentTimestampSource::open_with_block_size(
            temp_dir.path().join("TIMESTAMP"),
            16,
        )
        .expect("Failed to open timestamp source");
        Self::build(TransactorConfig::default(), Arc::new(source), Some(temp_dir))
    }

    fn build(
        config: TransactorConfig,
        timestamps: Arc<dyn TimestampSource>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let transactions = Arc::new(InMemoryStore::new());
        let data = Arc::new(InMemoryStore::new());
        let transactor = Arc::new(SiTransactor::new(config, timestamps, transactions.clone()));
        let table = TransactionalTable::new(data.clone(), Arc::clone(&transactor));
        Self {
            transactor,
            table,
            data,
            transactions,
            _temp_dir: temp_dir,
        }
    }

    /// Begins a root transaction that may write.
    pub fn begin(&self) -> TransactionId {
        self.transactor
            .begin_transaction(true, false, false)
            .expect("Failed to begin transaction")
    }

    /// Begins a read-only root transaction.
    pub fn begin_read_only(&self) -> TransactionId {
        self.transactor
            .begin_transaction(false, false, false)
            .expect("Failed to begin transaction")
    }

    /// Begins a writable child of `parent`.
    pub fn begin_child(&self, parent: TransactionId, dependent: bool) -> TransactionId {
        self.transactor
            .begin_child_transaction(parent, dependent, true, None, None)
            .expect("Failed to begin child transaction")
    }

    /// Writes `value` to the fixture column of `row`.
    pub fn write(&self, id: TransactionId, row: &str, value: impl Into<Bytes>) -> CoreResult<()> {
        let mut put =
            Put::new(Bytes::copy_from_slice(row.as_bytes())).add(FAMILY, QUALIFIER, value);
        self.transactor.initialize_put(id, &mut put);
        self.table.put(&put)
    }

    /// Deletes `row`.
    pub fn delete(&self, id: TransactionId, row: &str) -> CoreResult<()> {
        let put = self
            .transactor
            .create_delete_put(id, Bytes::copy_from_slice(row.as_bytes()));
        self.table.put(&put)
    }

    /// Reads the fixture column of `row` as seen by `id`.
    pub fn read(&self, id: TransactionId, row: &str) -> CoreResult<Option<Bytes>> {
        let mut get = Get::new(Bytes::copy_from_slice(row.as_bytes())).family(FAMILY);
        self.transactor.initialize_get(id, &mut get);
        let cells = self.table.get(&get)?;
        Ok(cells
            .into_iter()
            .find(|c| c.is_column(FAMILY.as_bytes(), QUALIFIER.as_bytes()))
            .map(|c| c.value().clone()))
    }

    /// Returns every visible row with its fixture column value, as seen by
    /// `id`.
    pub fn scan_rows(&self, id: TransactionId) -> CoreResult<Vec<(Bytes, Bytes)>> {
        let mut scan = Scan::all().family(FAMILY);
        self.transactor.initialize_scan(id, &mut scan);
        Ok(self
            .table
            .scan(&scan)?
            .into_iter()
            .filter_map(|row| {
                let value = row
                    .cells
                    .iter()
                    .find(|c| c.is_column(FAMILY.as_bytes(), QUALIFIER.as_bytes()))?
                    .value()
                    .clone();
                Some((row.row, value))
            })
            .collect())
    }

    /// Returns the current status of a transaction.
    pub fn status(&self, id: TransactionId) -> TransactionStatus {
        self.transactor
            .get_transaction(id)
            .expect("Failed to read transaction")
            .status()
    }

    /// Returns the end timestamp of a committed transaction.
    pub fn end_timestamp(&self, id: TransactionId) -> Option<u64> {
        self.transactor
            .get_transaction(id)
            .expect("Failed to read transaction")
            .end_timestamp()
    }
}

/// Runs a test with a fresh in-memory transactor.
///
/// # Example
///
/// ```rust
/// use sitx_testkit::with_transactor;
///
/// with_transactor(|t| {
///     let txn = t.begin();
///     t.write(txn, "r1", "v1").unwrap();
///     assert_eq!(t.read(txn, "r1").unwrap().as_deref(), Some(&b"v1"[..]));
/// });
/// ```
pub fn with_transactor<F, R>(f: F) -> R
where
    F: FnOnce(&TestTransactor) -> R,
{
    let fixture = TestTransactor::memory();
    f(&fixture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fixture_round_trip() {
        let t = TestTransactor::memory();
        let txn = t.begin();
        t.write(txn, "r1", "v1").unwrap();
        t.transactor.commit(txn).unwrap();

        let reader = t.begin_read_only();
        assert_eq!(t.read(reader, "r1").unwrap().as_deref(), Some(&b"v1"[..]));
        assert_eq!(t.transactions.row_count(), 2);
        assert_eq!(t.data.row_count(), 1);
    }

    #[test]
    fn persistent_fixture_issues_timestamps() {
        let t = TestTransactor::persistent();
        let first = t.begin();
        let second = t.begin();
        assert!(first < second);
    }

    #[test]
    fn scan_rows_lists_visible_rows() {
        with_transactor(|t| {
            let txn = t.begin();
            t.write(txn, "a", "1").unwrap();
            t.write(txn, "b", "2").unwrap();
            t.delete(txn, "b").unwrap();
            let rows = t.scan_rows(txn).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].0, "a");
        });
    }
}
