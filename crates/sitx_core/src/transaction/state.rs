//! Transaction state.

use crate::types::TransactionId;
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle status of a transaction.
///
/// ```text
/// ACTIVE ──> COMMITTING ──> COMMITTED
///   │            └──────────> ERROR       (commit could not be recorded)
///   │ ──────────────────────> COMMITTED   (child committed by its parent)
///   │ ──> LOCAL_COMMIT ─────> COMMITTED   (dependent child, root committed)
///   │ ──> ROLLED_BACK
///   └───> ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Running; may read and write.
    Active = 0,
    /// Being committed; only seen while a parent gathers its children.
    Committing = 1,
    /// Committed; has an end timestamp.
    Committed = 2,
    /// Dependent child committed into its parent, awaiting the root.
    LocalCommit = 3,
    /// Rolled back by the caller.
    RolledBack = 4,
    /// Failed, for example on a write conflict.
    Error = 5,
}

impl TransactionStatus {
    /// Converts a byte to a status.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Active),
            1 => Some(Self::Committing),
            2 => Some(Self::Committed),
            3 => Some(Self::LocalCommit),
            4 => Some(Self::RolledBack),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Converts the status to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true once no further change is permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Error)
    }

    /// ACTIVE or LOCAL_COMMIT: writes are provisionally visible within the
    /// transaction family.
    #[must_use]
    pub const fn is_effectively_active(self) -> bool {
        matches!(self, Self::Active | Self::LocalCommit)
    }

    /// Checks whether the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Active => !matches!(next, Self::Active),
            Self::Committing => matches!(next, Self::Committed | Self::Error),
            Self::LocalCommit => matches!(next, Self::Committed),
            Self::Committed | Self::RolledBack | Self::Error => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::LocalCommit => "LOCAL_COMMIT",
            Self::RolledBack => "ROLLED_BACK",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Parameters a transaction is created with.
///
/// Read-mode flags left as `None` are inherited from the parent, or default
/// to `false` for root transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionParams {
    /// Parent transaction, for nested transactions.
    pub parent: Option<TransactionId>,
    /// Whether a child's commit is only local until its parent commits.
    pub dependent: bool,
    /// Whether the transaction may write.
    pub allow_writes: bool,
    /// Whether uncommitted writes of other transactions are visible.
    pub read_uncommitted: Option<bool>,
    /// Whether all committed writes are visible regardless of snapshot.
    pub read_committed: Option<bool>,
}

impl TransactionParams {
    /// Parameters of a root transaction.
    #[must_use]
    pub const fn root(allow_writes: bool, read_uncommitted: bool, read_committed: bool) -> Self {
        Self {
            parent: None,
            dependent: false,
            allow_writes,
            read_uncommitted: Some(read_uncommitted),
            read_committed: Some(read_committed),
        }
    }

    /// Parameters of a child transaction.
    #[must_use]
    pub const fn child(
        parent: TransactionId,
        dependent: bool,
        allow_writes: bool,
        read_uncommitted: Option<bool>,
        read_committed: Option<bool>,
    ) -> Self {
        Self {
            parent: Some(parent),
            dependent,
            allow_writes,
            read_uncommitted,
            read_committed,
        }
    }
}

/// Durable record of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub(crate) id: u64,
    pub(crate) begin_timestamp: u64,
    pub(crate) parent: Option<u64>,
    pub(crate) dependent: bool,
    pub(crate) allow_writes: bool,
    pub(crate) read_uncommitted: bool,
    pub(crate) read_committed: bool,
    pub(crate) status: TransactionStatus,
    pub(crate) end_timestamp: Option<u64>,
    pub(crate) children: BTreeSet<u64>,
}

impl TransactionRecord {
    /// Returns the raw id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the id as a [`TransactionId`].
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(self.id)
    }

    /// Returns the begin timestamp (the reader snapshot).
    #[must_use]
    pub fn begin_timestamp(&self) -> u64 {
        self.begin_timestamp
    }

    /// Returns the end timestamp; set if and only if COMMITTED.
    #[must_use]
    pub fn end_timestamp(&self) -> Option<u64> {
        self.end_timestamp
    }

    /// Returns the parent id, if nested.
    #[must_use]
    pub fn parent(&self) -> Option<u64> {
        self.parent
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Returns the heavy children registered with this transaction.
    #[must_use]
    pub fn children(&self) -> &BTreeSet<u64> {
        &self.children
    }

    /// Returns true if the transaction may write.
    #[must_use]
    pub fn allows_writes(&self) -> bool {
        self.allow_writes
    }

    /// Returns true if this is a dependent child.
    #[must_use]
    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    /// Dependent children commit locally only.
    #[must_use]
    pub fn is_nested_dependent(&self) -> bool {
        self.parent.is_some() && self.dependent
    }

    /// Returns true if the status is exactly ACTIVE.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Returns true if the status is LOCAL_COMMIT.
    #[must_use]
    pub fn is_locally_committed(&self) -> bool {
        self.status == TransactionStatus::LocalCommit
    }

    /// Returns true if the status is ACTIVE or LOCAL_COMMIT.
    #[must_use]
    pub fn is_effectively_active(&self) -> bool {
        self.status.is_effectively_active()
    }
}

/// Read-only projection of a transaction used for conflict checks and
/// visibility decisions.
///
/// Holds only the fields fixed at creation, plus the resolved ancestor
/// chain, so it can be cached indefinitely. Status and end timestamp are
/// mutable and always come from a fresh [`TransactionRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableTransaction {
    pub(crate) id: u64,
    pub(crate) begin_timestamp: u64,
    pub(crate) dependent: bool,
    pub(crate) allow_writes: bool,
    pub(crate) read_uncommitted: bool,
    pub(crate) read_committed: bool,
    /// Parent first, root last.
    pub(crate) ancestors: Vec<u64>,
}

impl ImmutableTransaction {
    /// Returns the raw id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the id as a [`TransactionId`].
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(self.id)
    }

    /// Returns the begin timestamp (the reader snapshot).
    #[must_use]
    pub fn begin_timestamp(&self) -> u64 {
        self.begin_timestamp
    }

    /// Returns the parent id, if nested.
    #[must_use]
    pub fn parent(&self) -> Option<u64> {
        self.ancestors.first().copied()
    }

    /// Returns the ancestor chain, parent first.
    #[must_use]
    pub fn ancestors(&self) -> &[u64] {
        &self.ancestors
    }

    /// Returns true if `id` is a (transitive) parent of this transaction.
    #[must_use]
    pub fn is_descendant_of(&self, id: u64) -> bool {
        self.ancestors.contains(&id)
    }

    /// Returns true if `id` is this transaction or one of its ancestors.
    #[must_use]
    pub fn is_self_or_descendant_of(&self, id: u64) -> bool {
        self.id == id || self.is_descendant_of(id)
    }

    /// Returns true if this is a dependent child.
    #[must_use]
    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    /// Returns true if the transaction may not write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.allow_writes
    }

    /// Returns true if uncommitted writes of others are visible.
    #[must_use]
    pub fn reads_uncommitted(&self) -> bool {
        self.read_uncommitted
    }

    /// Returns true if all committed writes are visible.
    #[must_use]
    pub fn reads_committed(&self) -> bool {
        self.read_committed
    }
}

/// Where a transaction's writes stand, after following local commits up
/// to the ancestor that holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveState {
    /// Not yet committed; visible only within the family of `owner`.
    Active {
        /// The transaction whose family currently holds the writes.
        owner: u64,
    },
    /// `owner` is between COMMITTING and COMMITTED; its end timestamp is
    /// being issued and may fall on either side of an observer's snapshot.
    Committing {
        /// The committing transaction.
        owner: u64,
    },
    /// Committed at `end_timestamp`.
    Committed {
        /// The commit instant.
        end_timestamp: u64,
    },
    /// Rolled back or failed; the writes never become visible.
    Failed,
}
