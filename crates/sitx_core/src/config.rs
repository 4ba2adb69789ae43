//! Transactor configuration.

use bytes::Bytes;
use std::time::Duration;

/// Column layout of the transaction table.
///
/// One row per transaction, keyed by the big-endian id. Scalar fields live
/// in `family`; each heavy child is a column of `children_family` whose
/// qualifier is the child's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSchema {
    /// Family holding the scalar fields.
    pub family: Bytes,
    /// Family holding one column per child.
    pub children_family: Bytes,
    /// Begin timestamp qualifier.
    pub begin_qualifier: Bytes,
    /// Parent id qualifier.
    pub parent_qualifier: Bytes,
    /// Dependent flag qualifier.
    pub dependent_qualifier: Bytes,
    /// Allow-writes flag qualifier.
    pub allow_writes_qualifier: Bytes,
    /// Read-uncommitted flag qualifier.
    pub read_uncommitted_qualifier: Bytes,
    /// Read-committed flag qualifier.
    pub read_committed_qualifier: Bytes,
    /// End (commit) timestamp qualifier.
    pub commit_qualifier: Bytes,
    /// Status qualifier.
    pub status_qualifier: Bytes,
}

impl Default for TransactionSchema {
    fn default() -> Self {
        Self {
            family: Bytes::from_static(b"siFamily"),
            children_family: Bytes::from_static(b"siChildrenFamily"),
            begin_qualifier: Bytes::from_static(b"begin"),
            parent_qualifier: Bytes::from_static(b"parent"),
            dependent_qualifier: Bytes::from_static(b"dependent"),
            allow_writes_qualifier: Bytes::from_static(b"allowWrites"),
            read_uncommitted_qualifier: Bytes::from_static(b"readUncommitted"),
            read_committed_qualifier: Bytes::from_static(b"readCommitted"),
            commit_qualifier: Bytes::from_static(b"commit"),
            status_qualifier: Bytes::from_static(b"status"),
        }
    }
}

/// Configuration of a [`SiTransactor`](crate::SiTransactor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactorConfig {
    /// Attribute flagging an operation for snapshot isolation treatment.
    pub si_needed_attribute: String,
    /// Attribute carrying the serialized transaction id.
    pub transaction_id_attribute: String,
    /// Attribute marking a put as a delete.
    pub delete_put_attribute: String,
    /// Attribute telling index maintenance to ignore a put.
    pub suppress_indexing_attribute: String,

    /// Column family for transaction metadata on data rows.
    ///
    /// User families must sort after it so that readers see tombstones
    /// before data.
    pub si_family: Bytes,
    /// Qualifier of the commit-timestamp marker column.
    pub commit_qualifier: Bytes,
    /// Qualifier of the tombstone column.
    pub tombstone_qualifier: Bytes,
    /// Placeholder value for marker cells.
    pub si_null: Bytes,

    /// Layout of the transaction table.
    pub schema: TransactionSchema,

    /// Maximum number of cached immutable transaction views (0 disables).
    pub immutable_cache_size: usize,
    /// Maximum number of cached terminal transaction records (0 disables).
    pub terminal_cache_size: usize,

    /// How long a reader or writer waits for a commit in progress to settle.
    pub commit_wait_timeout: Duration,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            si_needed_attribute: "si-needed".to_owned(),
            transaction_id_attribute: "si-transaction-id".to_owned(),
            delete_put_attribute: "si-delete-put".to_owned(),
            suppress_indexing_attribute: "suppress-indexing".to_owned(),
            si_family: Bytes::from_static(b"_si"),
            commit_qualifier: Bytes::from_static(b"commit"),
            tombstone_qualifier: Bytes::from_static(b"tombstone"),
            si_null: Bytes::from_static(&[0xff]),
            schema: TransactionSchema::default(),
            immutable_cache_size: 10_000,
            terminal_cache_size: 10_000,
            commit_wait_timeout: Duration::from_secs(10),
        }
    }
}

impl TransactorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the column family used for transaction metadata.
    #[must_use]
    pub fn si_family(mut self, family: impl Into<Bytes>) -> Self {
        self.si_family = family.into();
        self
    }

    /// Sets the transaction table layout.
    #[must_use]
    pub fn schema(mut self, schema: TransactionSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the immutable view cache size.
    #[must_use]
    pub fn immutable_cache_size(mut self, size: usize) -> Self {
        self.immutable_cache_size = size;
        self
    }

    /// Sets the terminal record cache size.
    #[must_use]
    pub fn terminal_cache_size(mut self, size: usize) -> Self {
        self.terminal_cache_size = size;
        self
    }

    /// Sets how long to wait for a commit in progress.
    #[must_use]
    pub fn commit_wait_timeout(mut self, timeout: Duration) -> Self {
        self.commit_wait_timeout = timeout;
        self
    }

    /// Disables both transaction caches.
    #[must_use]
    pub fn without_caches(self) -> Self {
        self.immutable_cache_size(0).terminal_cache_size(0)
    }
}
