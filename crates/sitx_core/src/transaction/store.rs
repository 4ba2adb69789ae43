//! Durable transaction records on top of a row store.

use crate::config::{TransactionSchema, TransactorConfig};
use crate::error::{CoreError, CoreResult};
use crate::transaction::cache::BoundedCache;
use crate::transaction::state::{
    EffectiveState, ImmutableTransaction, TransactionParams, TransactionRecord, TransactionStatus,
};
use crate::types::TransactionId;
use bytes::Bytes;
use sitx_storage::{Cell, Get, Put, RowLock, RowStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Transaction table access.
///
/// Every record is one row keyed by [`TransactionId::row_key`]. Mutations
/// run under that row's lock: read the current record, validate, write
/// under the lock, release. Single-row atomicity is all this store relies
/// on; no operation spans two records.
///
/// The table must be a different [`RowStore`] from the data tables the
/// transactor guards, because transaction rows are plain unversioned
/// state.
pub struct TransactionStore {
    table: Arc<dyn RowStore>,
    schema: TransactionSchema,
    immutable_cache: BoundedCache<u64, ImmutableTransaction>,
    terminal_cache: BoundedCache<u64, TransactionRecord>,
}

impl TransactionStore {
    /// Creates a store over `table`.
    pub fn new(table: Arc<dyn RowStore>, config: &TransactorConfig) -> Self {
        Self {
            table,
            schema: config.schema.clone(),
            immutable_cache: BoundedCache::new(config.immutable_cache_size),
            terminal_cache: BoundedCache::new(config.terminal_cache_size),
        }
    }

    /// Creates the record of a new transaction.
    ///
    /// Read-mode flags left unset in `params` are taken from the parent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionExists`] if a record for `id` is
    /// already present, or [`CoreError::TransactionNotFound`] if the parent
    /// has no record.
    pub fn record_new_transaction(
        &self,
        id: TransactionId,
        params: &TransactionParams,
        status: TransactionStatus,
    ) -> CoreResult<TransactionRecord> {
        let (read_uncommitted, read_committed) = match params.parent {
            Some(parent) => {
                let parent = self.get_transaction(parent.id())?;
                (
                    params.read_uncommitted.unwrap_or(parent.read_uncommitted),
                    params.read_committed.unwrap_or(parent.read_committed),
                )
            }
            None => (
                params.read_uncommitted.unwrap_or(false),
                params.read_committed.unwrap_or(false),
            ),
        };

        let record = TransactionRecord {
            id: id.id(),
            begin_timestamp: id.id(),
            parent: params.parent.map(TransactionId::id),
            dependent: params.dependent,
            allow_writes: params.allow_writes,
            read_uncommitted,
            read_committed,
            status,
            end_timestamp: None,
            children: BTreeSet::new(),
        };

        self.mutate(id.id(), |current, put| {
            if current.is_some() {
                return Err(CoreError::TransactionExists {
                    transaction_id: id.id(),
                });
            }
            self.encode_record(&record, put);
            Ok(())
        })?;
        Ok(record)
    }

    /// Registers `child` with `parent`.
    ///
    /// Each child is its own column, so concurrent registrations from
    /// siblings never overwrite each other.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the parent has no
    /// record.
    pub fn add_child_to_transaction(&self, parent: u64, child: u64) -> CoreResult<()> {
        self.mutate(parent, |current, put| {
            if current.is_none() {
                return Err(CoreError::TransactionNotFound {
                    transaction_id: parent,
                });
            }
            put.push(
                self.schema.children_family.clone(),
                Bytes::copy_from_slice(&child.to_be_bytes()),
                None,
                Bytes::new(),
            );
            Ok(())
        })
    }

    /// Reads the current record of a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if no record exists.
    pub fn get_transaction(&self, id: u64) -> CoreResult<TransactionRecord> {
        if let Some(record) = self.terminal_cache.get(&id) {
            return Ok(record);
        }
        let record = self
            .read_record(id)?
            .ok_or(CoreError::TransactionNotFound { transaction_id: id })?;
        if record.status.is_terminal() {
            self.terminal_cache.insert(id, record.clone());
        }
        Ok(record)
    }

    /// Returns the immutable view of a transaction.
    ///
    /// A lightweight child resolves to its parent's view with writes
    /// disallowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the transaction or any
    /// of its ancestors has no record.
    pub fn get_immutable_transaction(&self, id: TransactionId) -> CoreResult<ImmutableTransaction> {
        let mut view = self.immutable_view(id.id())?;
        if id.is_independent_read_only() {
            view.allow_writes = false;
        }
        Ok(view)
    }

    fn immutable_view(&self, id: u64) -> CoreResult<ImmutableTransaction> {
        if let Some(view) = self.immutable_cache.get(&id) {
            return Ok(view);
        }
        let record = self.get_transaction(id)?;
        let ancestors = match record.parent {
            Some(parent) => {
                let mut ancestors = vec![parent];
                ancestors.extend_from_slice(self.immutable_view(parent)?.ancestors());
                ancestors
            }
            None => Vec::new(),
        };
        let view = ImmutableTransaction {
            id,
            begin_timestamp: record.begin_timestamp,
            dependent: record.dependent,
            allow_writes: record.allow_writes,
            read_uncommitted: record.read_uncommitted,
            read_committed: record.read_committed,
            ancestors,
        };
        self.immutable_cache.insert(id, view.clone());
        Ok(view)
    }

    /// Moves a transaction to a new non-committed status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalTransition`] if the state machine forbids
    /// the change, and [`CoreError::InvalidOperation`] for COMMITTED, which
    /// needs an end timestamp (see [`record_transaction_end`](Self::record_transaction_end)).
    pub fn record_transaction_status_change(
        &self,
        id: u64,
        status: TransactionStatus,
    ) -> CoreResult<()> {
        if status == TransactionStatus::Committed {
            return Err(CoreError::invalid_operation(
                "a commit must be recorded with its end timestamp",
            ));
        }
        self.mutate(id, |current, put| {
            let current = current.ok_or(CoreError::TransactionNotFound { transaction_id: id })?;
            Self::check_transition(&current, status)?;
            put.push(
                self.schema.family.clone(),
                self.schema.status_qualifier.clone(),
                None,
                Bytes::copy_from_slice(&[status.as_byte()]),
            );
            Ok(())
        })
    }

    /// Records the end of a transaction: its end timestamp and final status,
    /// written together.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalTransition`] if the state machine forbids
    /// the change, and [`CoreError::InvalidOperation`] for any status other
    /// than COMMITTED.
    pub fn record_transaction_end(
        &self,
        id: u64,
        end_timestamp: u64,
        status: TransactionStatus,
    ) -> CoreResult<()> {
        if status != TransactionStatus::Committed {
            return Err(CoreError::invalid_operation(format!(
                "only a commit carries an end timestamp, not {status}"
            )));
        }
        self.mutate(id, |current, put| {
            let current = current.ok_or(CoreError::TransactionNotFound { transaction_id: id })?;
            Self::check_transition(&current, status)?;
            put.push(
                self.schema.family.clone(),
                self.schema.commit_qualifier.clone(),
                None,
                Bytes::copy_from_slice(&end_timestamp.to_be_bytes()),
            );
            put.push(
                self.schema.family.clone(),
                self.schema.status_qualifier.clone(),
                None,
                Bytes::copy_from_slice(&[status.as_byte()]),
            );
            Ok(())
        })
    }

    /// Resolves where a transaction's writes stand.
    ///
    /// A locally committed transaction takes the state of its parent,
    /// following the chain upwards until a transaction that is not locally
    /// committed is found.
    ///
    /// # Errors
    ///
    /// Returns an error if an ancestor cannot be read, or a record is
    /// inconsistent.
    pub fn effective_state(&self, record: &TransactionRecord) -> CoreResult<EffectiveState> {
        let mut status = record.status;
        let mut id = record.id;
        let mut parent = record.parent;
        let mut end_timestamp = record.end_timestamp;
        loop {
            match status {
                TransactionStatus::Committed => {
                    let end_timestamp = end_timestamp.ok_or_else(|| {
                        CoreError::corrupted(format!(
                            "transaction {id} committed without end timestamp"
                        ))
                    })?;
                    return Ok(EffectiveState::Committed { end_timestamp });
                }
                TransactionStatus::RolledBack | TransactionStatus::Error => {
                    return Ok(EffectiveState::Failed)
                }
                TransactionStatus::Active => return Ok(EffectiveState::Active { owner: id }),
                TransactionStatus::Committing => {
                    return Ok(EffectiveState::Committing { owner: id })
                }
                TransactionStatus::LocalCommit => {
                    let parent_id = parent.ok_or_else(|| {
                        CoreError::corrupted(format!("root transaction {id} is locally committed"))
                    })?;
                    let next = self.get_transaction(parent_id)?;
                    status = next.status;
                    id = next.id;
                    parent = next.parent;
                    end_timestamp = next.end_timestamp;
                }
            }
        }
    }

    fn check_transition(current: &TransactionRecord, to: TransactionStatus) -> CoreResult<()> {
        if current.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                transaction_id: current.id,
                from: current.status,
                to,
            })
        }
    }

    /// Runs `f` on the current record under the row lock and writes what it
    /// adds to the put. The lock is released on every path.
    fn mutate<T>(
        &self,
        id: u64,
        f: impl FnOnce(Option<TransactionRecord>, &mut Put) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let key = TransactionId::new(id).row_key();
        let lock = self.table.lock_row(&key)?;
        let result = self.mutate_locked(id, &lock, f);
        let unlocked = self.table.unlock_row(&lock);
        let value = result?;
        unlocked?;
        Ok(value)
    }

    fn mutate_locked<T>(
        &self,
        id: u64,
        lock: &RowLock,
        f: impl FnOnce(Option<TransactionRecord>, &mut Put) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let current = self.read_record(id)?;
        let mut put = Put::with_lock(lock.row().clone(), lock.clone());
        let value = f(current, &mut put)?;
        if !put.values().is_empty() {
            self.table.put(&put)?;
        }
        Ok(value)
    }

    fn encode_record(&self, record: &TransactionRecord, put: &mut Put) {
        let schema = &self.schema;
        let mut scalar = |qualifier: &Bytes, value: &[u8]| {
            put.push(
                schema.family.clone(),
                qualifier.clone(),
                None,
                Bytes::copy_from_slice(value),
            );
        };
        scalar(&schema.begin_qualifier, &record.begin_timestamp.to_be_bytes());
        if let Some(parent) = record.parent {
            scalar(&schema.parent_qualifier, &parent.to_be_bytes());
        }
        scalar(&schema.dependent_qualifier, &[u8::from(record.dependent)]);
        scalar(&schema.allow_writes_qualifier, &[u8::from(record.allow_writes)]);
        scalar(
            &schema.read_uncommitted_qualifier,
            &[u8::from(record.read_uncommitted)],
        );
        scalar(
            &schema.read_committed_qualifier,
            &[u8::from(record.read_committed)],
        );
        if let Some(end) = record.end_timestamp {
            scalar(&schema.commit_qualifier, &end.to_be_bytes());
        }
        scalar(&schema.status_qualifier, &[record.status.as_byte()]);
    }

    fn read_record(&self, id: u64) -> CoreResult<Option<TransactionRecord>> {
        let key = TransactionId::new(id).row_key();
        let cells = self.table.get(&Get::new(Bytes::copy_from_slice(&key)), None)?;
        if cells.is_empty() {
            return Ok(None);
        }

        let schema = &self.schema;
        let mut begin_timestamp = None;
        let mut parent = None;
        let mut dependent = false;
        let mut allow_writes = false;
        let mut read_uncommitted = false;
        let mut read_committed = false;
        let mut end_timestamp = None;
        let mut status = None;
        let mut children = BTreeSet::new();

        for cell in &cells {
            if cell.family() == &schema.children_family {
                children.insert(decode_u64(id, cell.qualifier())?);
                continue;
            }
            if cell.family() != &schema.family {
                continue;
            }
            let qualifier = cell.qualifier();
            if qualifier == &schema.begin_qualifier {
                begin_timestamp = Some(decode_u64(id, cell.value())?);
            } else if qualifier == &schema.parent_qualifier {
                parent = Some(decode_u64(id, cell.value())?);
            } else if qualifier == &schema.dependent_qualifier {
                dependent = decode_bool(id, cell)?;
            } else if qualifier == &schema.allow_writes_qualifier {
                allow_writes = decode_bool(id, cell)?;
            } else if qualifier == &schema.read_uncommitted_qualifier {
                read_uncommitted = decode_bool(id, cell)?;
            } else if qualifier == &schema.read_committed_qualifier {
                read_committed = decode_bool(id, cell)?;
            } else if qualifier == &schema.commit_qualifier {
                end_timestamp = Some(decode_u64(id, cell.value())?);
            } else if qualifier == &schema.status_qualifier {
                let byte = match cell.value().as_ref() {
                    [byte] => *byte,
                    _ => return Err(malformed(id, "status")),
                };
                status = Some(
                    TransactionStatus::from_byte(byte).ok_or_else(|| malformed(id, "status"))?,
                );
            }
        }

        let begin_timestamp = begin_timestamp.ok_or_else(|| malformed(id, "begin timestamp"))?;
        let status = status.ok_or_else(|| malformed(id, "status"))?;
        Ok(Some(TransactionRecord {
            id,
            begin_timestamp,
            parent,
            dependent,
            allow_writes,
            read_uncommitted,
            read_committed,
            status,
            end_timestamp,
            children,
        }))
    }

    #[cfg(test)]
    pub(crate) fn cached_views(&self) -> usize {
        self.immutable_cache.len()
    }
}

fn malformed(id: u64, field: &str) -> CoreError {
    CoreError::corrupted(format!("transaction {id}: missing or malformed {field}"))
}

fn decode_u64(id: u64, bytes: &[u8]) -> CoreResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| malformed(id, "timestamp"))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_bool(id: u64, cell: &Cell) -> CoreResult<bool> {
    match cell.value().as_ref() {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(malformed(id, "flag")),
    }
}
