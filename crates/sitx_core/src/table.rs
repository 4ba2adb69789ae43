//! Storage-side table wrapper.

use crate::error::CoreResult;
use crate::transactor::SiTransactor;
use sitx_storage::{Cell, Get, Put, RowResult, RowStore, Scan};
use std::sync::Arc;

/// A data table whose operations pass through a transactor.
///
/// This is what the storage side of a deployment does with every operation
/// it receives: tagged puts go through the SI write path, tagged reads are
/// widened and filtered for visibility, and untagged operations reach the
/// store untouched.
pub struct TransactionalTable {
    /// The data table.
    store: Arc<dyn RowStore>,
    /// Transactor guarding the table.
    transactor: Arc<SiTransactor>,
}

impl TransactionalTable {
    /// Creates a new transactional table.
    pub fn new(store: Arc<dyn RowStore>, transactor: Arc<SiTransactor>) -> Self {
        Self { store, transactor }
    }

    /// Returns the transactor.
    #[must_use]
    pub fn transactor(&self) -> &Arc<SiTransactor> {
        &self.transactor
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Applies a put.
    ///
    /// # Errors
    ///
    /// Returns any error of the SI write path, including write conflicts.
    pub fn put(&self, put: &Put) -> CoreResult<()> {
        if !self.transactor.process_put(self.store.as_ref(), put)? {
            self.store.put(put)?;
        }
        Ok(())
    }

    /// Reads a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the read's transaction is unknown, or a writer of
    /// a candidate cell has no record.
    pub fn get(&self, get: &Get) -> CoreResult<Vec<Cell>> {
        let mut get = get.clone();
        self.transactor.pre_process_read(&mut get);
        if !self.transactor.is_filter_needed(&get) {
            return Ok(self.store.get(&get, None)?);
        }
        let mut state = self.transactor.new_filter_state(&get)?;
        Ok(self.store.get(&get, Some(&mut state))?)
    }

    /// Reads a range of rows. Rows with no visible cell are omitted.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn scan(&self, scan: &Scan) -> CoreResult<Vec<RowResult>> {
        let mut scan = scan.clone();
        self.transactor.pre_process_read(&mut scan);
        if !self.transactor.is_filter_needed(&scan) {
            return Ok(self.store.scan(&scan, None)?.collect());
        }
        let mut state = self.transactor.new_filter_state(&scan)?;
        Ok(self.store.scan(&scan, Some(&mut state))?.collect())
    }
}
