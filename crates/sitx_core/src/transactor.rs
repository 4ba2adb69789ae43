//! The snapshot isolation transactor.

use crate::config::TransactorConfig;
use crate::data_store::DataStore;
use crate::error::{CoreError, CoreResult};
use crate::filter::FilterState;
use crate::stats::TransactorStats;
use crate::timestamp::TimestampSource;
use crate::transaction::{
    EffectiveState, ImmutableTransaction, TransactionParams, TransactionRecord, TransactionStatus,
    TransactionStore,
};
use crate::types::TransactionId;
use bytes::Bytes;
use sitx_storage::{
    to_string_binary, Cell, Get, Operation, Put, Read, ReturnCode, RowLock, RowStore, Scan,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const COMMIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Multi-version concurrency control over a row store.
///
/// Clients use the transactor to begin and end transactions and to tag the
/// operations they send with a transaction id. The storage side hands every
/// tagged put to [`process_put`](Self::process_put) and filters every tagged
/// read through a [`FilterState`].
///
/// ## Snapshot isolation
///
/// A transaction reads the versions committed before it began, plus the
/// uncommitted writes of itself and its ancestors. A write fails with
/// [`CoreError::WriteConflict`] if the row was written by a transaction that
/// committed after the writer began, or is held by an uncommitted writer
/// outside the writer's family. The conflict check runs under the row's
/// lock, so two writers can never both pass it for the same row.
///
/// ## Nesting
///
/// A dependent child commits locally: its writes become visible to its
/// family, and to everybody else when the root commits. Independent heavy
/// children commit on their own. Children that only read are lightweight
/// and never touch the transaction table.
pub struct SiTransactor {
    timestamps: Arc<dyn TimestampSource>,
    transactions: TransactionStore,
    data: DataStore,
    stats: TransactorStats,
}

impl SiTransactor {
    /// Creates a transactor keeping its records in `transaction_table`.
    ///
    /// The transaction table must not be one of the data tables the
    /// transactor guards.
    pub fn new(
        config: TransactorConfig,
        timestamps: Arc<dyn TimestampSource>,
        transaction_table: Arc<dyn RowStore>,
    ) -> Self {
        Self {
            timestamps,
            transactions: TransactionStore::new(transaction_table, &config),
            data: DataStore::new(config),
            stats: TransactorStats::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TransactorConfig {
        self.data.config()
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &TransactorStats {
        &self.stats
    }

    /// Returns the transaction store.
    #[must_use]
    pub fn transaction_store(&self) -> &TransactionStore {
        &self.transactions
    }

    /// Returns the data row conventions.
    #[must_use]
    pub fn data_store(&self) -> &DataStore {
        &self.data
    }

    // === Lifecycle ===

    /// Begins a root transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no timestamp can be issued or the record cannot
    /// be written.
    pub fn begin_transaction(
        &self,
        allow_writes: bool,
        read_uncommitted: bool,
        read_committed: bool,
    ) -> CoreResult<TransactionId> {
        let params = TransactionParams::root(allow_writes, read_uncommitted, read_committed);
        self.begin(&params)
    }

    /// Begins a child of `parent`.
    ///
    /// A child that is dependent or may write gets its own record and is
    /// registered with its parent. Any other child is lightweight: it shares
    /// the parent's id, is read only, and has no record. Read flags left as
    /// `None` are inherited from the parent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the parent has no
    /// record, or an error from the timestamp source or the store.
    pub fn begin_child_transaction(
        &self,
        parent: TransactionId,
        dependent: bool,
        allow_writes: bool,
        read_uncommitted: Option<bool>,
        read_committed: Option<bool>,
    ) -> CoreResult<TransactionId> {
        if !dependent && !allow_writes {
            self.stats.record_lightweight_child();
            return Ok(TransactionId::lightweight(parent.id()));
        }
        let params = TransactionParams::child(
            parent,
            dependent,
            allow_writes,
            read_uncommitted,
            read_committed,
        );
        let child = self.begin(&params)?;
        self.transactions
            .add_child_to_transaction(parent.id(), child.id())?;
        Ok(child)
    }

    fn begin(&self, params: &TransactionParams) -> CoreResult<TransactionId> {
        let id = TransactionId::new(self.timestamps.next_timestamp()?);
        self.transactions
            .record_new_transaction(id, params, TransactionStatus::Active)?;
        self.stats.record_begin();
        debug!(
            transaction_id = %id,
            parent = ?params.parent.map(TransactionId::id),
            "began transaction"
        );
        Ok(id)
    }

    /// Commits a transaction.
    ///
    /// A nested dependent transaction only commits locally. Any other
    /// transaction gets an end timestamp, which its immediate children that
    /// are still open share. Grandchildren are not re-stamped; their writes
    /// resolve through their locally committed parents.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotActive`] unless the transaction is ACTIVE.
    /// Returns [`CoreError::CommitFailed`] if the commit could not be
    /// recorded once started; the transaction is then ERROR.
    pub fn commit(&self, id: TransactionId) -> CoreResult<()> {
        if id.is_independent_read_only() {
            return Ok(());
        }
        let record = self.require_active(id)?;
        if record.is_nested_dependent() {
            self.transactions
                .record_transaction_status_change(id.id(), TransactionStatus::LocalCommit)?;
            self.stats.record_local_commit();
            debug!(transaction_id = %id, "committed locally");
            return Ok(());
        }

        self.transactions
            .record_transaction_status_change(id.id(), TransactionStatus::Committing)?;
        let (end_timestamp, children) = match self.stamp_commit(id) {
            Ok(stamped) => stamped,
            Err(err) => return self.abandon_commit(id, err),
        };
        for child in children {
            match self.transactions.record_transaction_end(
                child,
                end_timestamp,
                TransactionStatus::Committed,
            ) {
                Ok(()) => {}
                Err(CoreError::IllegalTransition { from, .. }) => {
                    debug!(transaction_id = child, status = %from, "child resolved concurrently");
                }
                // The parent is committed; locally committed children
                // resolve through it regardless.
                Err(err) => {
                    warn!(transaction_id = child, error = %err, "could not stamp child commit");
                }
            }
        }
        self.stats.record_commit();
        debug!(transaction_id = %id, end_timestamp, "committed");
        Ok(())
    }

    /// Gives a COMMITTING transaction its end timestamp. Returns the end
    /// timestamp and the children that share it.
    fn stamp_commit(&self, id: TransactionId) -> CoreResult<(u64, Vec<u64>)> {
        let children = self.open_children(id.id())?;
        let end_timestamp = self.timestamps.next_timestamp()?;
        self.transactions
            .record_transaction_end(id.id(), end_timestamp, TransactionStatus::Committed)?;
        Ok((end_timestamp, children))
    }

    /// Settles a commit that failed after COMMITTING was recorded, so that
    /// nobody waits on it.
    fn abandon_commit(&self, id: TransactionId, cause: CoreError) -> CoreResult<()> {
        match self
            .transactions
            .record_transaction_status_change(id.id(), TransactionStatus::Error)
        {
            Ok(()) => {
                self.stats.record_fail();
                warn!(
                    transaction_id = %id,
                    error = %cause,
                    "commit failed, transaction marked ERROR"
                );
            }
            Err(CoreError::IllegalTransition {
                from: TransactionStatus::Committed,
                ..
            }) => {
                // The end timestamp landed before the error surfaced.
                self.stats.record_commit();
                debug!(transaction_id = %id, error = %cause, "committed despite error");
                return Ok(());
            }
            Err(err) => {
                warn!(
                    transaction_id = %id,
                    error = %err,
                    cause = %cause,
                    "could not mark failed commit"
                );
            }
        }
        Err(CoreError::CommitFailed {
            transaction_id: id.id(),
            source: Box::new(cause),
        })
    }

    /// Immediate children that still await their parent's commit.
    fn open_children(&self, id: u64) -> CoreResult<Vec<u64>> {
        let record = self.transactions.get_transaction(id)?;
        let mut open = Vec::new();
        for &child in record.children() {
            let child = self.transactions.get_transaction(child)?;
            if child.is_effectively_active() {
                open.push(child.id());
            }
        }
        Ok(open)
    }

    /// Rolls back a transaction.
    ///
    /// Only an ACTIVE transaction is rolled back. Rolling back anything else
    /// is ignored, so callers may roll back unconditionally on their error
    /// paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    pub fn rollback(&self, id: TransactionId) -> CoreResult<()> {
        if id.is_independent_read_only() {
            return Ok(());
        }
        let record = self.transactions.get_transaction(id.id())?;
        if !record.is_active() {
            debug!(transaction_id = %id, status = %record.status(), "ignoring rollback");
            return Ok(());
        }
        match self
            .transactions
            .record_transaction_status_change(id.id(), TransactionStatus::RolledBack)
        {
            Ok(()) => {
                self.stats.record_rollback();
                debug!(transaction_id = %id, "rolled back");
                Ok(())
            }
            Err(CoreError::IllegalTransition { from, .. }) => {
                debug!(transaction_id = %id, status = %from, "ignoring rollback");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Marks a transaction as failed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotActive`] unless the transaction is ACTIVE.
    pub fn fail(&self, id: TransactionId) -> CoreResult<()> {
        if id.is_independent_read_only() {
            return Ok(());
        }
        self.require_active(id)?;
        self.transactions
            .record_transaction_status_change(id.id(), TransactionStatus::Error)?;
        self.stats.record_fail();
        debug!(transaction_id = %id, "failed");
        Ok(())
    }

    fn require_active(&self, id: TransactionId) -> CoreResult<TransactionRecord> {
        let record = self.transactions.get_transaction(id.id())?;
        if record.is_active() {
            Ok(record)
        } else {
            Err(CoreError::not_active(id.id(), record.status()))
        }
    }

    /// Reads the current record of a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if no record exists.
    pub fn get_transaction(&self, id: TransactionId) -> CoreResult<TransactionRecord> {
        self.transactions.get_transaction(id.id())
    }

    // === Client side ===

    /// Parses the string form of a transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransactionId`] for malformed input.
    pub fn transaction_id_from_string(&self, input: &str) -> CoreResult<TransactionId> {
        input.parse()
    }

    /// Recovers the transaction id stamped on an operation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTransactionId`] if the stamp is malformed.
    pub fn transaction_id_from_operation(
        &self,
        op: &impl Operation,
    ) -> CoreResult<Option<TransactionId>> {
        self.data.transaction_id(op)
    }

    /// Tags a get with a transaction.
    pub fn initialize_get(&self, id: TransactionId, get: &mut Get) {
        self.initialize_operation(id, get);
    }

    /// Tags a scan with a transaction.
    pub fn initialize_scan(&self, id: TransactionId, scan: &mut Scan) {
        self.initialize_operation(id, scan);
    }

    /// Tags a put with a transaction.
    pub fn initialize_put(&self, id: TransactionId, put: &mut Put) {
        self.initialize_operation(id, put);
    }

    fn initialize_operation(&self, id: TransactionId, op: &mut impl Operation) {
        self.data.set_si_needed(op);
        self.data.set_transaction_id(op, id);
    }

    /// Builds a put that deletes `row` within a transaction.
    pub fn create_delete_put(&self, id: TransactionId, row: impl Into<Bytes>) -> Put {
        let mut put = Put::new(row);
        self.initialize_put(id, &mut put);
        self.data.set_delete_put(&mut put);
        put
    }

    /// Returns true if a put is a delete.
    #[must_use]
    pub fn is_delete_put(&self, put: &Put) -> bool {
        self.data.is_delete_put(put)
    }

    // === Server side ===

    /// Prepares a tagged read for filtering: every version and timestamp is
    /// read, and the SI family is included. Untagged reads are left alone.
    pub fn pre_process_read(&self, read: &mut impl Read) {
        if self.data.is_si_needed(read) {
            self.data.widen_read(read);
        }
    }

    /// Returns true if a read must be filtered for visibility.
    #[must_use]
    pub fn is_filter_needed(&self, read: &impl Operation) -> bool {
        self.data.is_si_needed(read)
    }

    /// Creates the visibility filter for a tagged read.
    ///
    /// # Errors
    ///
    /// Returns an error if the read carries no valid transaction id or the
    /// transaction has no record.
    pub fn new_filter_state(&self, read: &impl Operation) -> CoreResult<FilterState<'_>> {
        let id = self
            .data
            .transaction_id(read)?
            .ok_or_else(|| CoreError::invalid_operation("read carries no transaction id"))?;
        let reader = self.transactions.get_immutable_transaction(id)?;
        Ok(FilterState::new(self, reader))
    }

    /// Decides what to do with one candidate cell.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the cell's writer has no
    /// record.
    pub fn filter_key_value(
        &self,
        state: &mut FilterState<'_>,
        cell: &Cell,
    ) -> CoreResult<ReturnCode> {
        state.filter(cell)
    }

    /// Runs a put through the SI write path.
    ///
    /// Returns `Ok(false)` without touching anything if the put is not
    /// tagged; the caller then applies it as is. A tagged put is checked for
    /// conflicts and written to `table` as its physical form, and `Ok(true)`
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WriteConflict`] if the write conflicts, in which
    /// case the transaction has been marked ERROR; [`CoreError::ReadOnly`] or
    /// [`CoreError::NotActive`] if the transaction may not write; or a
    /// storage error (a lock timeout is retryable).
    pub fn process_put(&self, table: &dyn RowStore, put: &Put) -> CoreResult<bool> {
        if !self.data.is_si_needed(put) {
            self.stats.record_pass_through_put();
            return Ok(false);
        }
        let id = self
            .data
            .transaction_id(put)?
            .ok_or_else(|| CoreError::invalid_operation("put carries no transaction id"))?;
        let writer = self.transactions.get_immutable_transaction(id)?;
        if writer.is_read_only() {
            return Err(CoreError::ReadOnly {
                transaction_id: id.id(),
            });
        }
        self.require_active(id)?;

        let si_family = &self.config().si_family;
        if let Some(value) = put.values().iter().find(|v| &v.family <= si_family) {
            return Err(CoreError::invalid_operation(format!(
                "column family {} must sort after {}",
                to_string_binary(&value.family),
                to_string_binary(si_family)
            )));
        }

        let lock = table.lock_row(put.row())?;
        let result = self.write_locked(table, put, &writer, &lock);
        let unlocked = table.unlock_row(&lock);
        result?;
        unlocked?;
        self.stats.record_si_put();
        Ok(true)
    }

    fn write_locked(
        &self,
        table: &dyn RowStore,
        put: &Put,
        writer: &ImmutableTransaction,
        lock: &RowLock,
    ) -> CoreResult<()> {
        let markers = self.data.read_markers(table, put.row())?;
        // Commit and rollback take no data-row locks, so the status may have
        // moved since the unlocked check.
        self.require_active(writer.transaction_id())?;
        self.check_conflicts(writer, &markers.writers, put.row())?;
        let rewritten = markers.rewritten_since_delete(writer.id());
        let physical = self.data.physical_put(
            put,
            writer.id(),
            lock.clone(),
            rewritten.as_deref(),
        );
        table.put(&physical)?;
        Ok(())
    }

    fn check_conflicts(
        &self,
        writer: &ImmutableTransaction,
        existing: &[u64],
        row: &Bytes,
    ) -> CoreResult<()> {
        for &other in existing {
            if other == writer.id() {
                continue;
            }
            let conflict = match self.settled_state(writer, other)? {
                EffectiveState::Committed { end_timestamp } => {
                    end_timestamp >= writer.begin_timestamp()
                }
                EffectiveState::Active { owner } | EffectiveState::Committing { owner } => {
                    !self.same_family(writer, owner)?
                }
                EffectiveState::Failed => false,
            };
            if conflict {
                return Err(self.write_conflict(writer, other, row));
            }
        }
        Ok(())
    }

    /// Returns true if `owner` is the writer, one of its ancestors, or one of
    /// its descendants.
    fn same_family(&self, writer: &ImmutableTransaction, owner: u64) -> CoreResult<bool> {
        if writer.is_self_or_descendant_of(owner) {
            return Ok(true);
        }
        let owner = self
            .transactions
            .get_immutable_transaction(TransactionId::new(owner))?;
        Ok(owner.is_descendant_of(writer.id()))
    }

    /// Marks the writer ERROR and builds the conflict error.
    fn write_conflict(&self, writer: &ImmutableTransaction, other: u64, row: &Bytes) -> CoreError {
        self.stats.record_write_conflict();
        let row = to_string_binary(row);
        warn!(
            transaction_id = writer.id(),
            conflicting = other,
            row = %row,
            "write/write conflict"
        );
        match self
            .transactions
            .record_transaction_status_change(writer.id(), TransactionStatus::Error)
        {
            Ok(()) => self.stats.record_fail(),
            Err(err) => {
                debug!(
                    transaction_id = writer.id(),
                    error = %err,
                    "could not mark conflicting transaction"
                );
            }
        }
        CoreError::WriteConflict {
            transaction_id: writer.id(),
            row,
        }
    }

    /// Resolves the state of `writer` as `observer` must judge it.
    ///
    /// The end timestamp of a committing transaction is not known yet, so
    /// whether it precedes the observer's snapshot is undecided. Unless the
    /// observer belongs to the committing family, wait for the commit to
    /// land. Commits take no row locks, so waiting under one cannot
    /// deadlock.
    fn settled_state(
        &self,
        observer: &ImmutableTransaction,
        writer: u64,
    ) -> CoreResult<EffectiveState> {
        let deadline = Instant::now() + self.config().commit_wait_timeout;
        loop {
            let record = self.transactions.get_transaction(writer)?;
            match self.transactions.effective_state(&record)? {
                EffectiveState::Committing { owner }
                    if !observer.is_self_or_descendant_of(owner) =>
                {
                    if Instant::now() >= deadline {
                        return Err(CoreError::CommitPending {
                            transaction_id: owner,
                        });
                    }
                    thread::sleep(COMMIT_POLL_INTERVAL);
                }
                state => return Ok(state),
            }
        }
    }

    /// Decides whether `reader` sees the versions written by `writer`.
    pub(crate) fn is_visible(
        &self,
        reader: &ImmutableTransaction,
        writer: u64,
    ) -> CoreResult<bool> {
        Ok(match self.settled_state(reader, writer)? {
            EffectiveState::Committed { end_timestamp } => {
                reader.reads_committed()
                    || reader.reads_uncommitted()
                    || end_timestamp <= reader.begin_timestamp()
            }
            EffectiveState::Active { owner } | EffectiveState::Committing { owner } => {
                reader.is_self_or_descendant_of(owner) || reader.reads_uncommitted()
            }
            EffectiveState::Failed => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::SimpleTimestampSource;
    use sitx_storage::{InMemoryStore, StorageError};
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Fixture {
        transactor: SiTransactor,
        data: InMemoryStore,
    }

    fn fixture() -> Fixture {
        Fixture {
            transactor: SiTransactor::new(
                TransactorConfig::default(),
                Arc::new(SimpleTimestampSource::new()),
                Arc::new(InMemoryStore::new()),
            ),
            data: InMemoryStore::new(),
        }
    }

    impl Fixture {
        fn write(
            &self,
            id: TransactionId,
            row: &'static str,
            value: &'static str,
        ) -> CoreResult<bool> {
            let mut put = Put::new(row).add("attributes", "v", value);
            self.transactor.initialize_put(id, &mut put);
            self.transactor.process_put(&self.data, &put)
        }

        fn read(&self, id: TransactionId, row: &'static str) -> Option<Bytes> {
            let mut get = Get::new(row);
            self.transactor.initialize_get(id, &mut get);
            self.transactor.pre_process_read(&mut get);
            let mut state = self.transactor.new_filter_state(&get).unwrap();
            let cells = self.data.get(&get, Some(&mut state)).unwrap();
            cells.first().map(|c| c.value().clone())
        }

        fn status(&self, id: TransactionId) -> TransactionStatus {
            self.transactor.get_transaction(id).unwrap().status()
        }
    }

    #[test]
    fn begin_records_active_transaction() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(t1 < t2);
        assert_eq!(f.status(t1), TransactionStatus::Active);
        assert_eq!(f.transactor.stats().transactions_begun(), 2);
    }

    #[test]
    fn commit_then_second_commit_fails() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        f.transactor.commit(t).unwrap();

        let record = f.transactor.get_transaction(t).unwrap();
        assert_eq!(record.status(), TransactionStatus::Committed);
        assert!(record.end_timestamp().unwrap() > t.id());

        let err = f.transactor.commit(t).unwrap_err();
        assert!(matches!(err, CoreError::NotActive { .. }));
        assert!(err.to_string().contains("transaction is not ACTIVE"));
        assert!(f.transactor.fail(t).is_err());
    }

    #[test]
    fn rollback_is_idempotent() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        f.transactor.rollback(t).unwrap();
        f.transactor.rollback(t).unwrap();
        assert_eq!(f.status(t), TransactionStatus::RolledBack);

        let c = f.transactor.begin_transaction(true, false, false).unwrap();
        f.transactor.commit(c).unwrap();
        f.transactor.rollback(c).unwrap();
        assert_eq!(f.status(c), TransactionStatus::Committed);
        assert_eq!(f.transactor.stats().transactions_rolled_back(), 1);
    }

    #[test]
    fn fail_requires_active() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        f.transactor.fail(t).unwrap();
        assert_eq!(f.status(t), TransactionStatus::Error);
        assert!(matches!(
            f.transactor.fail(t),
            Err(CoreError::NotActive {
                status: TransactionStatus::Error,
                ..
            })
        ));
    }

    #[test]
    fn lightweight_child_lifecycle_is_noop() {
        let f = fixture();
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, false, false, None, None)
            .unwrap();
        assert_eq!(child.id(), parent.id());
        assert!(child.is_independent_read_only());

        f.transactor.commit(child).unwrap();
        f.transactor.fail(child).unwrap();
        f.transactor.rollback(child).unwrap();
        assert_eq!(f.status(parent), TransactionStatus::Active);
        assert!(f.transactor.get_transaction(parent).unwrap().children().is_empty());
    }

    #[test]
    fn lightweight_child_cannot_write() {
        let f = fixture();
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, false, false, None, None)
            .unwrap();
        assert!(matches!(
            f.write(child, "r1", "v"),
            Err(CoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn read_only_transaction_cannot_write() {
        let f = fixture();
        let t = f.transactor.begin_transaction(false, false, false).unwrap();
        let err = f.write(t, "r1", "v").unwrap_err();
        assert!(err.to_string().contains("transaction is read only"));
        assert_eq!(f.data.row_count(), 0);
    }

    #[test]
    fn untagged_put_passes_through() {
        let f = fixture();
        let put = Put::new("r1").add("attributes", "v", "raw");
        assert!(!f.transactor.process_put(&f.data, &put).unwrap());
        assert_eq!(f.data.row_count(), 0);
        assert_eq!(f.transactor.stats().pass_through_puts(), 1);
    }

    #[test]
    fn family_sorting_before_si_family_rejected() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        let mut put = Put::new("r1").add("0", "v", "x");
        f.transactor.initialize_put(t, &mut put);
        assert!(matches!(
            f.transactor.process_put(&f.data, &put),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn committed_write_visible_to_later_reader() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(f.write(t1, "r1", "v1").unwrap());
        f.transactor.commit(t1).unwrap();

        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();
        assert_eq!(f.read(t2, "r1").as_deref(), Some(&b"v1"[..]));
        assert!(f.write(t2, "r1", "v2").unwrap());
        assert_eq!(f.read(t2, "r1").as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn concurrent_writer_conflicts_and_is_marked_error() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(t1, "r1", "v1").unwrap();
        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();

        let err = f.write(t2, "r1", "v2").unwrap_err();
        assert!(err.is_write_conflict());
        assert!(!err.is_retryable());
        assert_eq!(f.status(t2), TransactionStatus::Error);
        assert_eq!(f.status(t1), TransactionStatus::Active);
        assert!(!f.data.is_locked(b"r1"));
        assert_eq!(f.transactor.stats().write_conflicts(), 1);
    }

    #[test]
    fn commit_after_writer_began_conflicts() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(t1, "r1", "v1").unwrap();
        f.transactor.commit(t1).unwrap();

        assert!(f.write(t2, "r1", "v2").unwrap_err().is_write_conflict());
    }

    #[test]
    fn rolled_back_writer_does_not_conflict() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(t1, "r1", "v1").unwrap();
        f.transactor.rollback(t1).unwrap();

        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(f.write(t2, "r1", "v2").unwrap());
        assert_eq!(f.read(t2, "r1").as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn uncommitted_write_invisible_to_others() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(t1, "r1", "v1").unwrap();

        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(reader, "r1"), None);
        let dirty = f.transactor.begin_transaction(false, true, false).unwrap();
        assert_eq!(f.read(dirty, "r1").as_deref(), Some(&b"v1"[..]));
        assert_eq!(f.read(t1, "r1").as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn read_committed_sees_later_commits() {
        let f = fixture();
        let snapshot = f.transactor.begin_transaction(false, false, false).unwrap();
        let committed = f.transactor.begin_transaction(false, false, true).unwrap();

        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(writer, "r1", "v1").unwrap();
        f.transactor.commit(writer).unwrap();

        assert_eq!(f.read(snapshot, "r1"), None);
        assert_eq!(f.read(committed, "r1").as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn dependent_child_commits_locally() {
        let f = fixture();
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, true, true, None, None)
            .unwrap();
        f.write(child, "r2", "x").unwrap();
        f.transactor.commit(child).unwrap();
        assert_eq!(f.status(child), TransactionStatus::LocalCommit);
        assert!(f.transactor.commit(child).is_err());

        let outsider = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(outsider, "r2"), None);
        assert_eq!(f.read(parent, "r2").as_deref(), Some(&b"x"[..]));

        f.transactor.commit(parent).unwrap();
        let parent_end = f.transactor.get_transaction(parent).unwrap().end_timestamp();
        let child_record = f.transactor.get_transaction(child).unwrap();
        assert_eq!(child_record.status(), TransactionStatus::Committed);
        assert_eq!(child_record.end_timestamp(), parent_end);

        let fresh = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(fresh, "r2").as_deref(), Some(&b"x"[..]));
        assert_eq!(f.read(outsider, "r2"), None);
    }

    #[test]
    fn child_writes_over_parent_without_conflict() {
        let f = fixture();
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(parent, "r1", "p").unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, true, true, None, None)
            .unwrap();
        assert!(f.write(child, "r1", "c").unwrap());
        f.transactor.commit(child).unwrap();
        assert!(f.write(parent, "r1", "p2").unwrap());
    }

    #[test]
    fn rolled_back_parent_discards_local_commits() {
        let f = fixture();
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, true, true, None, None)
            .unwrap();
        f.write(child, "r1", "x").unwrap();
        f.transactor.commit(child).unwrap();
        f.transactor.rollback(parent).unwrap();

        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(reader, "r1"), None);
        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(f.write(writer, "r1", "y").unwrap());
    }

    #[test]
    fn delete_hides_row_and_rewrite_restores_it() {
        let f = fixture();
        let t1 = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(t1, "r1", "v1").unwrap();
        f.transactor.commit(t1).unwrap();

        let t2 = f.transactor.begin_transaction(true, false, false).unwrap();
        let delete = f.transactor.create_delete_put(t2, "r1");
        assert!(f.transactor.is_delete_put(&delete));
        assert!(f.transactor.process_put(&f.data, &delete).unwrap());
        assert_eq!(f.read(t2, "r1"), None);

        f.write(t2, "r1", "v3").unwrap();
        assert_eq!(f.read(t2, "r1").as_deref(), Some(&b"v3"[..]));
        f.transactor.commit(t2).unwrap();

        let t3 = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(t3, "r1").as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn write_under_finished_transaction_rejected() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        f.transactor.commit(t).unwrap();
        assert!(matches!(
            f.write(t, "r1", "late"),
            Err(CoreError::NotActive { .. })
        ));
    }

    #[test]
    fn missing_writer_is_fatal_on_read() {
        let f = fixture();
        f.data
            .put(&Put::new("r1").add_at("attributes", "v", 999, "orphan"))
            .unwrap();
        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        let mut get = Get::new("r1");
        f.transactor.initialize_get(reader, &mut get);
        f.transactor.pre_process_read(&mut get);
        let mut state = f.transactor.new_filter_state(&get).unwrap();
        let err: CoreError = f.data.get(&get, Some(&mut state)).unwrap_err().into();
        assert!(matches!(
            err,
            CoreError::TransactionNotFound { transaction_id: 999 }
        ));
    }

    #[test]
    fn reader_waits_out_a_commit_in_progress() {
        let f = Fixture {
            transactor: SiTransactor::new(
                TransactorConfig::default().commit_wait_timeout(Duration::from_millis(20)),
                Arc::new(SimpleTimestampSource::new()),
                Arc::new(InMemoryStore::new()),
            ),
            data: InMemoryStore::new(),
        };
        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(writer, "r1", "v1").unwrap();
        let store = f.transactor.transaction_store();
        store
            .record_transaction_status_change(writer.id(), TransactionStatus::Committing)
            .unwrap();

        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        let mut get = Get::new("r1");
        f.transactor.initialize_get(reader, &mut get);
        f.transactor.pre_process_read(&mut get);
        let mut state = f.transactor.new_filter_state(&get).unwrap();
        let err: CoreError = f.data.get(&get, Some(&mut state)).unwrap_err().into();
        assert!(matches!(err, CoreError::CommitPending { .. }));
        assert!(err.is_retryable());

        // The writer still sees its own write while committing.
        assert_eq!(f.read(writer, "r1").as_deref(), Some(&b"v1"[..]));

        store
            .record_transaction_end(writer.id(), reader.id() - 1, TransactionStatus::Committed)
            .unwrap();
        assert_eq!(f.read(reader, "r1").as_deref(), Some(&b"v1"[..]));
    }

    /// Counts calls and fails the `failing`th one.
    struct FlakyTimestamps {
        inner: SimpleTimestampSource,
        calls: AtomicU64,
        failing: u64,
    }

    impl TimestampSource for FlakyTimestamps {
        fn next_timestamp(&self) -> CoreResult<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.failing {
                return Err(CoreError::Io(io::Error::other("fsync failed")));
            }
            self.inner.next_timestamp()
        }
    }

    #[test]
    fn failed_commit_marks_transaction_error() {
        let f = Fixture {
            transactor: SiTransactor::new(
                TransactorConfig::default().commit_wait_timeout(Duration::from_millis(20)),
                Arc::new(FlakyTimestamps {
                    inner: SimpleTimestampSource::new(),
                    calls: AtomicU64::new(0),
                    failing: 2,
                }),
                Arc::new(InMemoryStore::new()),
            ),
            data: InMemoryStore::new(),
        };
        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        f.write(writer, "r1", "v1").unwrap();

        let err = f.transactor.commit(writer).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CommitFailed { transaction_id, .. } if transaction_id == writer.id()
        ));
        assert!(!err.is_retryable());
        assert_eq!(f.status(writer), TransactionStatus::Error);
        assert_eq!(f.transactor.stats().transactions_failed(), 1);
        assert_eq!(f.transactor.stats().transactions_committed(), 0);

        assert!(matches!(
            f.transactor.commit(writer),
            Err(CoreError::NotActive { .. })
        ));
        f.transactor.rollback(writer).unwrap();
        assert_eq!(f.status(writer), TransactionStatus::Error);

        // Nobody waits on the abandoned commit.
        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(reader, "r1"), None);
        let other = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(f.write(other, "r1", "v2").unwrap());
        f.transactor.commit(other).unwrap();
    }

    #[test]
    fn failed_commit_fails_locally_committed_children() {
        let f = Fixture {
            transactor: SiTransactor::new(
                TransactorConfig::default(),
                Arc::new(FlakyTimestamps {
                    inner: SimpleTimestampSource::new(),
                    calls: AtomicU64::new(0),
                    failing: 3,
                }),
                Arc::new(InMemoryStore::new()),
            ),
            data: InMemoryStore::new(),
        };
        let parent = f.transactor.begin_transaction(true, false, false).unwrap();
        let child = f
            .transactor
            .begin_child_transaction(parent, true, true, None, None)
            .unwrap();
        f.write(child, "r1", "x").unwrap();
        f.transactor.commit(child).unwrap();

        assert!(f.transactor.commit(parent).is_err());
        assert_eq!(f.status(child), TransactionStatus::LocalCommit);
        let reader = f.transactor.begin_transaction(false, false, false).unwrap();
        assert_eq!(f.read(reader, "r1"), None);
        let other = f.transactor.begin_transaction(true, false, false).unwrap();
        assert!(f.write(other, "r1", "y").unwrap());
    }

    #[test]
    fn row_lock_timeout_is_retryable_and_keeps_transaction_active() {
        let f = Fixture {
            transactor: SiTransactor::new(
                TransactorConfig::default(),
                Arc::new(SimpleTimestampSource::new()),
                Arc::new(InMemoryStore::new()),
            ),
            data: InMemoryStore::with_lock_timeout(Duration::from_millis(20)),
        };
        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        let held = f.data.lock_row(b"r1").unwrap();

        let err = f.write(writer, "r1", "v1").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Storage(StorageError::LockTimeout { .. })
        ));
        assert!(err.is_retryable());
        assert!(!err.is_write_conflict());
        assert_eq!(f.status(writer), TransactionStatus::Active);
        assert_eq!(f.transactor.stats().write_conflicts(), 0);

        f.data.unlock_row(&held).unwrap();
        assert!(f.write(writer, "r1", "v1").unwrap());
        assert_eq!(f.read(writer, "r1").as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn write_rechecks_status_under_the_row_lock() {
        let f = fixture();
        let writer = f.transactor.begin_transaction(true, false, false).unwrap();
        let view = f
            .transactor
            .transaction_store()
            .get_immutable_transaction(writer)
            .unwrap();
        // Rolled back after the unlocked checks passed.
        f.transactor.rollback(writer).unwrap();

        let mut put = Put::new("r1").add("attributes", "v", "late");
        f.transactor.initialize_put(writer, &mut put);
        let lock = f.data.lock_row(b"r1").unwrap();
        let err = f
            .transactor
            .write_locked(&f.data, &put, &view, &lock)
            .unwrap_err();
        f.data.unlock_row(&lock).unwrap();

        assert!(matches!(
            err,
            CoreError::NotActive {
                status: TransactionStatus::RolledBack,
                ..
            }
        ));
        assert!(f.data.raw_row(b"r1").is_empty());
    }

    #[test]
    fn id_from_string_and_operation() {
        let f = fixture();
        let t = f.transactor.begin_transaction(true, false, false).unwrap();
        let parsed = f.transactor.transaction_id_from_string(&t.to_string()).unwrap();
        assert_eq!(parsed, t);

        let mut scan = Scan::all();
        assert_eq!(f.transactor.transaction_id_from_operation(&scan).unwrap(), None);
        f.transactor.initialize_scan(t, &mut scan);
        assert_eq!(
            f.transactor.transaction_id_from_operation(&scan).unwrap(),
            Some(t)
        );
        assert!(f.transactor.is_filter_needed(&scan));
    }
}
