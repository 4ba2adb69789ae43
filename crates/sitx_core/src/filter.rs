//! Read-path visibility filter.

use crate::data_store::{CellKind, Column};
use crate::error::CoreResult;
use crate::transaction::ImmutableTransaction;
use crate::transactor::SiTransactor;
use bytes::Bytes;
use sitx_storage::{Cell, CellFilter, ReturnCode, StorageError, StorageResult};
use std::cmp::Ordering;
use std::collections::HashMap;

/// The visible delete or rewrite of the current row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RowTombstone {
    at: u64,
    /// Columns written at `at` after the delete. Empty for a plain
    /// tombstone.
    rewritten: Vec<Column>,
}

impl RowTombstone {
    fn hides(&self, cell: &Cell) -> bool {
        match cell.timestamp().cmp(&self.at) {
            Ordering::Less => true,
            Ordering::Equal => !self
                .rewritten
                .iter()
                .any(|(family, qualifier)| cell.is_column(family, qualifier)),
            Ordering::Greater => false,
        }
    }
}

/// Per-read visibility filter.
///
/// Cells must arrive grouped by row, then by column, newest version first,
/// with the SI family ahead of user families. For each column the filter
/// includes the newest version the reader may see, unless a visible
/// tombstone on the row hides it, and moves on to the next column.
///
/// Writer visibility is resolved once per writer and remembered for the
/// life of the filter.
pub struct FilterState<'a> {
    transactor: &'a SiTransactor,
    reader: ImmutableTransaction,
    visibility: HashMap<u64, bool>,
    row: Option<Bytes>,
    tombstone: Option<RowTombstone>,
    tombstone_resolved: bool,
    resolved_column: Option<(Bytes, Bytes)>,
}

impl<'a> FilterState<'a> {
    pub(crate) fn new(transactor: &'a SiTransactor, reader: ImmutableTransaction) -> Self {
        Self {
            transactor,
            reader,
            visibility: HashMap::new(),
            row: None,
            tombstone: None,
            tombstone_resolved: false,
            resolved_column: None,
        }
    }

    /// Returns the reading transaction.
    #[must_use]
    pub fn reader(&self) -> &ImmutableTransaction {
        &self.reader
    }

    /// Decides what to do with one candidate cell.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`](crate::CoreError::TransactionNotFound)
    /// if the cell's writer has no record.
    pub fn filter(&mut self, cell: &Cell) -> CoreResult<ReturnCode> {
        if self.row.as_ref() != Some(cell.row()) {
            self.start_row(cell.row().clone());
        }

        match self.transactor.data_store().classify(cell) {
            CellKind::CommitMarker => Ok(ReturnCode::NextCol),
            kind @ (CellKind::Tombstone | CellKind::AntiTombstone) => {
                if self.tombstone_resolved {
                    return Ok(ReturnCode::NextCol);
                }
                if !self.visible(cell.timestamp())? {
                    return Ok(ReturnCode::Skip);
                }
                let rewritten = match kind {
                    CellKind::AntiTombstone => {
                        self.transactor.data_store().rewritten_columns(cell)?
                    }
                    _ => Vec::new(),
                };
                self.tombstone_resolved = true;
                self.tombstone = Some(RowTombstone {
                    at: cell.timestamp(),
                    rewritten,
                });
                Ok(ReturnCode::NextCol)
            }
            CellKind::User => {
                let resolved = self
                    .resolved_column
                    .as_ref()
                    .is_some_and(|(family, qualifier)| cell.is_column(family, qualifier));
                if resolved {
                    return Ok(ReturnCode::NextCol);
                }
                if !self.visible(cell.timestamp())? {
                    self.transactor.stats().record_filtered_cell();
                    return Ok(ReturnCode::Skip);
                }
                self.resolved_column = Some((cell.family().clone(), cell.qualifier().clone()));
                if self.tombstone.as_ref().is_some_and(|t| t.hides(cell)) {
                    self.transactor.stats().record_filtered_cell();
                    return Ok(ReturnCode::NextCol);
                }
                Ok(ReturnCode::Include)
            }
        }
    }

    fn start_row(&mut self, row: Bytes) {
        self.row = Some(row);
        self.tombstone = None;
        self.tombstone_resolved = false;
        self.resolved_column = None;
    }

    fn visible(&mut self, writer: u64) -> CoreResult<bool> {
        if let Some(&visible) = self.visibility.get(&writer) {
            return Ok(visible);
        }
        let visible = self.transactor.is_visible(&self.reader, writer)?;
        self.visibility.insert(writer, visible);
        Ok(visible)
    }
}

impl CellFilter for FilterState<'_> {
    fn filter_cell(&mut self, cell: &Cell) -> StorageResult<ReturnCode> {
        self.filter(cell).map_err(StorageError::filter)
    }

    fn reset(&mut self) {
        self.row = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactorConfig;
    use crate::data_store::anti_tombstone_value;
    use crate::timestamp::SimpleTimestampSource;
    use crate::types::TransactionId;
    use sitx_storage::InMemoryStore;
    use std::sync::Arc;

    fn transactor() -> SiTransactor {
        SiTransactor::new(
            TransactorConfig::default(),
            Arc::new(SimpleTimestampSource::new()),
            Arc::new(InMemoryStore::new()),
        )
    }

    fn cell(
        row: &'static str,
        family: &'static str,
        qualifier: &'static str,
        ts: u64,
        value: &'static [u8],
    ) -> Cell {
        Cell::new(row, family, qualifier, ts, Bytes::from_static(value))
    }

    fn state(transactor: &SiTransactor, reader: TransactionId) -> FilterState<'_> {
        let view = transactor
            .transaction_store()
            .get_immutable_transaction(reader)
            .unwrap();
        FilterState::new(transactor, view)
    }

    #[test]
    fn tombstone_hides_older_and_same_version() {
        let deleted = RowTombstone {
            at: 5,
            rewritten: Vec::new(),
        };
        assert!(deleted.hides(&cell("r", "f", "a", 5, b"v")));
        assert!(deleted.hides(&cell("r", "f", "a", 4, b"v")));
        assert!(!deleted.hides(&cell("r", "f", "a", 6, b"v")));

        let rewritten = RowTombstone {
            at: 5,
            rewritten: vec![(Bytes::from_static(b"f"), Bytes::from_static(b"a"))],
        };
        assert!(!rewritten.hides(&cell("r", "f", "a", 5, b"v")));
        assert!(rewritten.hides(&cell("r", "f", "b", 5, b"v")));
        assert!(rewritten.hides(&cell("r", "f", "a", 4, b"v")));
    }

    #[test]
    fn newest_visible_version_per_column() {
        let t = transactor();
        let old = t.begin_transaction(true, false, false).unwrap();
        t.commit(old).unwrap();
        let reader = t.begin_transaction(false, false, false).unwrap();
        let pending = t.begin_transaction(true, false, false).unwrap();

        let mut filter = state(&t, reader);
        assert_eq!(
            filter.filter(&cell("r", "_si", "commit", pending.id(), b"\xff")).unwrap(),
            ReturnCode::NextCol
        );
        assert_eq!(
            filter.filter(&cell("r", "f", "a", pending.id(), b"new")).unwrap(),
            ReturnCode::Skip
        );
        assert_eq!(
            filter.filter(&cell("r", "f", "a", old.id(), b"old")).unwrap(),
            ReturnCode::Include
        );
        assert_eq!(
            filter.filter(&cell("r", "f", "a", 0, b"older")).unwrap(),
            ReturnCode::NextCol
        );
        assert_eq!(t.stats().filtered_cells(), 1);
    }

    #[test]
    fn row_change_resets_tombstone() {
        let t = transactor();
        let writer = t.begin_transaction(true, false, false).unwrap();

        let mut filter = state(&t, writer);
        assert_eq!(
            filter.filter(&cell("r1", "_si", "tombstone", writer.id(), b"\xff")).unwrap(),
            ReturnCode::NextCol
        );
        assert_eq!(
            filter.filter(&cell("r1", "f", "a", writer.id(), b"x")).unwrap(),
            ReturnCode::NextCol
        );
        assert_eq!(
            filter.filter(&cell("r2", "f", "a", writer.id(), b"y")).unwrap(),
            ReturnCode::Include
        );
    }

    #[test]
    fn invisible_tombstone_is_skipped() {
        let t = transactor();
        let committed = t.begin_transaction(true, false, false).unwrap();
        t.commit(committed).unwrap();
        let reader = t.begin_transaction(false, false, false).unwrap();
        let deleter = t.begin_transaction(true, false, false).unwrap();

        let mut filter = state(&t, reader);
        assert_eq!(
            filter.filter(&cell("r", "_si", "tombstone", deleter.id(), b"\xff")).unwrap(),
            ReturnCode::Skip
        );
        assert_eq!(
            filter.filter(&cell("r", "f", "a", committed.id(), b"v")).unwrap(),
            ReturnCode::Include
        );
    }

    #[test]
    fn anti_tombstone_keeps_only_rewritten_columns() {
        let t = transactor();
        let writer = t.begin_transaction(true, false, false).unwrap();
        let anti_tombstone = Cell::new(
            "r",
            "_si",
            "tombstone",
            writer.id(),
            anti_tombstone_value(&[(Bytes::from_static(b"f"), Bytes::from_static(b"a"))]),
        );

        let mut filter = state(&t, writer);
        assert_eq!(filter.filter(&anti_tombstone).unwrap(), ReturnCode::NextCol);
        assert_eq!(
            filter.filter(&cell("r", "f", "a", writer.id(), b"again")).unwrap(),
            ReturnCode::Include
        );
        assert_eq!(
            filter.filter(&cell("r", "f", "b", writer.id(), b"deleted")).unwrap(),
            ReturnCode::NextCol
        );
    }

    #[test]
    fn malformed_anti_tombstone_is_corruption() {
        let t = transactor();
        let writer = t.begin_transaction(true, false, false).unwrap();
        let mut filter = state(&t, writer);
        assert!(matches!(
            filter.filter(&cell("r", "_si", "tombstone", writer.id(), b"\x00\x00")),
            Err(crate::CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn unknown_writer_error_survives_the_store() {
        let t = transactor();
        let reader = t.begin_transaction(false, false, false).unwrap();
        let mut filter = state(&t, reader);
        let err = filter
            .filter_cell(&cell("r", "f", "a", 4242, b"v"))
            .unwrap_err();
        let core: crate::CoreError = err.into();
        assert!(matches!(
            core,
            crate::CoreError::TransactionNotFound { transaction_id: 4242 }
        ));
    }
}
