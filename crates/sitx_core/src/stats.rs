//! Transactor statistics.
//!
//! Provides counters for monitoring transaction throughput and contention.
//!
//! # Usage
//!
//! ```rust,ignore
//! let transactor = SiTransactor::new(config, source, transactions, data);
//!
//! // Run transactions...
//!
//! let stats = transactor.stats().snapshot();
//! println!("Committed: {}", stats.transactions_committed);
//! println!("Conflicts: {}", stats.write_conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Transactor statistics.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only ever increase.
#[derive(Debug, Default)]
pub struct TransactorStats {
    // Lifecycle counters
    /// Transactions begun, root and heavy children.
    transactions_begun: AtomicU64,
    /// Lightweight children handed out.
    lightweight_children: AtomicU64,
    /// Transactions committed.
    transactions_committed: AtomicU64,
    /// Dependent children committed locally.
    local_commits: AtomicU64,
    /// Transactions rolled back.
    transactions_rolled_back: AtomicU64,
    /// Transactions failed by the caller or by a conflict.
    transactions_failed: AtomicU64,

    // Write path counters
    /// Puts rewritten by the SI write path.
    si_puts: AtomicU64,
    /// Puts passed through untouched.
    pass_through_puts: AtomicU64,
    /// Write/write conflicts detected.
    write_conflicts: AtomicU64,

    // Read path counters
    /// Cells hidden from readers by the visibility filter.
    filtered_cells: AtomicU64,
}

impl TransactorStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lightweight_child(&self) {
        self.lightweight_children.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_local_commit(&self) {
        self.local_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_si_put(&self) {
        self.si_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_through_put(&self) {
        self.pass_through_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered_cell(&self) {
        self.filtered_cells.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transactions begun.
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    /// Returns the number of lightweight children handed out.
    pub fn lightweight_children(&self) -> u64 {
        self.lightweight_children.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of local commits.
    pub fn local_commits(&self) -> u64 {
        self.local_commits.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions failed.
    pub fn transactions_failed(&self) -> u64 {
        self.transactions_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of SI puts.
    pub fn si_puts(&self) -> u64 {
        self.si_puts.load(Ordering::Relaxed)
    }

    /// Returns the number of pass-through puts.
    pub fn pass_through_puts(&self) -> u64 {
        self.pass_through_puts.load(Ordering::Relaxed)
    }

    /// Returns the number of write/write conflicts.
    ///
    /// A steady rise points at hot rows.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of cells hidden by visibility filters.
    pub fn filtered_cells(&self) -> u64 {
        self.filtered_cells.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_begun: self.transactions_begun(),
            lightweight_children: self.lightweight_children(),
            transactions_committed: self.transactions_committed(),
            local_commits: self.local_commits(),
            transactions_rolled_back: self.transactions_rolled_back(),
            transactions_failed: self.transactions_failed(),
            si_puts: self.si_puts(),
            pass_through_puts: self.pass_through_puts(),
            write_conflicts: self.write_conflicts(),
            filtered_cells: self.filtered_cells(),
        }
    }
}

/// A point-in-time snapshot of transactor statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions begun.
    pub transactions_begun: u64,
    /// Lightweight children handed out.
    pub lightweight_children: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Local commits.
    pub local_commits: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Transactions failed.
    pub transactions_failed: u64,
    /// SI puts.
    pub si_puts: u64,
    /// Pass-through puts.
    pub pass_through_puts: u64,
    /// Write/write conflicts.
    pub write_conflicts: u64,
    /// Cells hidden by visibility filters.
    pub filtered_cells: u64,
}
