//! Per-cell filter callbacks.

use crate::cell::Cell;
use crate::error::StorageResult;

/// Decision a [`CellFilter`] makes about one candidate cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// Return the cell to the reader.
    Include,
    /// Drop this cell and look at the next one.
    Skip,
    /// Drop this cell and the remaining versions of its column.
    NextCol,
    /// Drop this cell and the rest of the row.
    NextRow,
    /// The filter knows a better place to continue from.
    ///
    /// Stores that cannot seek treat this as [`ReturnCode::Skip`].
    SeekNextUsingHint,
}

/// A callback invoked by the store for every candidate cell of a read.
///
/// Cells arrive grouped by row, then by column in family/qualifier order,
/// and within a column newest version first.
pub trait CellFilter {
    /// Decides what to do with a candidate cell.
    ///
    /// # Errors
    ///
    /// An error aborts the whole read.
    fn filter_cell(&mut self, cell: &Cell) -> StorageResult<ReturnCode>;

    /// Called before the first cell of each row.
    fn reset(&mut self) {}
}
