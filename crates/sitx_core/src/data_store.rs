//! Transaction metadata conventions on data rows.
//!
//! Every SI write lands at a version equal to the writer's transaction id
//! and is accompanied by metadata cells in the SI family:
//!
//! ```text
//! family  qualifier   version   value
//! _si     commit      <txn id>  si_null        one per write; lists the row's writers
//! _si     tombstone   <txn id>  si_null        the row was deleted by <txn id>
//! _si     tombstone   <txn id>  <columns>      anti-tombstone: <txn id> rewrote these columns
//! <user>  <column>    <txn id>  <payload>
//! ```
//!
//! An anti-tombstone lists the columns its transaction wrote after deleting
//! the row, each as a length-prefixed family and qualifier. Only those
//! columns survive at the transaction's own version.
//!
//! Operations are tagged through attributes: one flags an operation for SI
//! treatment, one carries the transaction id, one marks delete puts and one
//! tells index maintenance to ignore the rewritten physical put.

use crate::config::TransactorConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sitx_storage::{Cell, Get, Operation, Put, Read, RowLock, RowStore};

/// A column named by family and qualifier.
pub type Column = (Bytes, Bytes);

/// What a cell on a data row is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// A commit marker (or other SI bookkeeping) column.
    CommitMarker,
    /// The row was deleted at this version.
    Tombstone,
    /// The row was rewritten at this version after being deleted by the
    /// same transaction.
    AntiTombstone,
    /// A user column.
    User,
}

/// The SI metadata found on a row before a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiMarkers {
    /// Transactions that wrote the row, newest first.
    pub writers: Vec<u64>,
    /// Transactions that deleted the row, newest first.
    pub tombstones: Vec<u64>,
    /// Transactions that rewrote the row after deleting it, with the
    /// columns rewritten, newest first.
    pub rewrites: Vec<(u64, Vec<Column>)>,
}

impl SiMarkers {
    /// Returns true if `transaction_id` deleted the row itself.
    #[must_use]
    pub fn tombstoned_by(&self, transaction_id: u64) -> bool {
        self.tombstones.contains(&transaction_id)
    }

    /// Returns the columns `transaction_id` has written since it deleted the
    /// row, or `None` if it has not deleted the row.
    #[must_use]
    pub fn rewritten_since_delete(&self, transaction_id: u64) -> Option<Vec<Column>> {
        if self.tombstoned_by(transaction_id) {
            return Some(Vec::new());
        }
        self.rewrites
            .iter()
            .find(|(id, _)| *id == transaction_id)
            .map(|(_, columns)| columns.clone())
    }
}

/// Reads and writes the SI conventions on data rows and operations.
#[derive(Debug, Clone)]
pub struct DataStore {
    config: TransactorConfig,
}

impl DataStore {
    /// Creates an adapter using the names in `config`.
    #[must_use]
    pub fn new(config: TransactorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TransactorConfig {
        &self.config
    }

    /// Flags an operation for SI treatment.
    pub fn set_si_needed(&self, op: &mut impl Operation) {
        op.attributes_mut()
            .set(self.config.si_needed_attribute.as_str(), self.config.si_null.clone());
    }

    /// Returns true if an operation is flagged for SI treatment.
    pub fn is_si_needed(&self, op: &impl Operation) -> bool {
        op.attributes().contains(&self.config.si_needed_attribute)
    }

    /// Stamps a transaction id onto an operation.
    pub fn set_transaction_id(&self, op: &mut impl Operation, id: TransactionId) {
        op.attributes_mut().set(
            self.config.transaction_id_attribute.as_str(),
            Bytes::from(id.to_string()),
        );
    }

    /// Recovers the transaction id stamped on an operation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransactionId`] if the attribute is not a
    /// valid id.
    pub fn transaction_id(&self, op: &impl Operation) -> CoreResult<Option<TransactionId>> {
        let Some(raw) = op.attributes().get(&self.config.transaction_id_attribute) else {
            return Ok(None);
        };
        let text = std::str::from_utf8(raw).map_err(|_| CoreError::InvalidTransactionId {
            input: sitx_storage::to_string_binary(raw),
        })?;
        text.parse().map(Some)
    }

    /// Marks a put as a delete.
    pub fn set_delete_put(&self, put: &mut Put) {
        put.attributes_mut()
            .set(self.config.delete_put_attribute.as_str(), self.config.si_null.clone());
    }

    /// Returns true if a put is a delete.
    pub fn is_delete_put(&self, put: &Put) -> bool {
        put.attributes().contains(&self.config.delete_put_attribute)
    }

    /// Returns true if a put was produced by the SI write path and must not
    /// be indexed or processed again.
    pub fn is_suppress_indexing(&self, put: &Put) -> bool {
        put.attributes()
            .contains(&self.config.suppress_indexing_attribute)
    }

    /// Makes a read see everything the visibility filter needs: all versions,
    /// all timestamps, and the SI family.
    pub fn widen_read(&self, read: &mut impl Read) {
        read.set_time_range(sitx_storage::TimeRange::all());
        read.set_all_versions();
        read.ensure_family(&self.config.si_family);
    }

    /// Classifies a cell of a data row.
    pub fn classify(&self, cell: &Cell) -> CellKind {
        if cell.family() != &self.config.si_family {
            return CellKind::User;
        }
        if cell.qualifier() == &self.config.tombstone_qualifier {
            if cell.value() == &self.config.si_null {
                CellKind::Tombstone
            } else {
                CellKind::AntiTombstone
            }
        } else {
            CellKind::CommitMarker
        }
    }

    /// Returns the columns an anti-tombstone keeps.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if the column list is malformed.
    pub fn rewritten_columns(&self, anti_tombstone: &Cell) -> CoreResult<Vec<Column>> {
        decode_columns(anti_tombstone.value())
    }

    /// Reads the commit markers and tombstones of a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or holds a malformed
    /// anti-tombstone.
    pub fn read_markers(&self, store: &dyn RowStore, row: &Bytes) -> CoreResult<SiMarkers> {
        let mut get = Get::new(row.clone()).family(self.config.si_family.clone());
        get.set_all_versions();
        let cells = store.get(&get, None)?;

        let mut markers = SiMarkers::default();
        for cell in &cells {
            match self.classify(cell) {
                CellKind::Tombstone => markers.tombstones.push(cell.timestamp()),
                CellKind::AntiTombstone => markers
                    .rewrites
                    .push((cell.timestamp(), self.rewritten_columns(cell)?)),
                CellKind::CommitMarker
                    if cell.qualifier() == &self.config.commit_qualifier =>
                {
                    markers.writers.push(cell.timestamp());
                }
                _ => {}
            }
        }
        Ok(markers)
    }

    /// Builds the physical write for an SI put.
    ///
    /// Every value moves to version `transaction_id`, a commit marker is
    /// added, and the put is tagged so that nothing downstream processes it
    /// again. A delete put writes a tombstone. A regular put on a row the
    /// same transaction deleted earlier writes an anti-tombstone listing
    /// `rewritten_since_delete` plus the put's own columns.
    pub fn physical_put(
        &self,
        original: &Put,
        transaction_id: u64,
        lock: RowLock,
        rewritten_since_delete: Option<&[Column]>,
    ) -> Put {
        let config = &self.config;
        let mut put = Put::with_lock(original.row().clone(), lock);
        put.push(
            config.si_family.clone(),
            config.commit_qualifier.clone(),
            Some(transaction_id),
            config.si_null.clone(),
        );

        if self.is_delete_put(original) {
            put.push(
                config.si_family.clone(),
                config.tombstone_qualifier.clone(),
                Some(transaction_id),
                config.si_null.clone(),
            );
        } else if let Some(rewritten) = rewritten_since_delete {
            let mut columns = rewritten.to_vec();
            for value in original.values() {
                let column = (value.family.clone(), value.qualifier.clone());
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
            put.push(
                config.si_family.clone(),
                config.tombstone_qualifier.clone(),
                Some(transaction_id),
                encode_columns(&columns),
            );
        }

        for value in original.values() {
            put.push(
                value.family.clone(),
                value.qualifier.clone(),
                Some(transaction_id),
                value.value.clone(),
            );
        }

        for (name, value) in original.attributes().iter() {
            if name != config.si_needed_attribute {
                put.attributes_mut().set(name, value.clone());
            }
        }
        put.attributes_mut()
            .set(config.suppress_indexing_attribute.as_str(), config.si_null.clone());
        put
    }
}

fn encode_columns(columns: &[Column]) -> Bytes {
    let mut buf = BytesMut::new();
    for (family, qualifier) in columns {
        for part in [family, qualifier] {
            buf.put_u32(part.len() as u32);
            buf.put_slice(part);
        }
    }
    buf.freeze()
}

fn decode_columns(mut raw: &[u8]) -> CoreResult<Vec<Column>> {
    let mut columns = Vec::new();
    while raw.has_remaining() {
        let family = take_part(&mut raw)?;
        let qualifier = take_part(&mut raw)?;
        columns.push((family, qualifier));
    }
    Ok(columns)
}

fn take_part(raw: &mut &[u8]) -> CoreResult<Bytes> {
    if raw.remaining() < 4 {
        return Err(CoreError::corrupted("truncated anti-tombstone column length"));
    }
    let len = raw.get_u32() as usize;
    if raw.remaining() < len {
        return Err(CoreError::corrupted("truncated anti-tombstone column name"));
    }
    let part = Bytes::copy_from_slice(&raw[..len]);
    raw.advance(len);
    Ok(part)
}

#[cfg(test)]
pub(crate) fn anti_tombstone_value(columns: &[Column]) -> Bytes {
    encode_columns(columns)
}
