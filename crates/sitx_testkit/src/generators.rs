//! Property-based test generators using proptest.
//!
//! Provides strategies for transaction ids, row keys and interleaved
//! multi-transaction schedules.

use proptest::prelude::*;
use sitx_core::TransactionId;

/// Strategy for generating transaction ids, heavy and lightweight.
pub fn transaction_id_strategy() -> impl Strategy<Value = TransactionId> {
    (any::<u64>(), any::<bool>()).prop_map(|(id, lightweight)| {
        if lightweight {
            TransactionId::lightweight(id)
        } else {
            TransactionId::new(id)
        }
    })
}

/// Strategy for generating row keys from a small key space, so that
/// schedules actually contend.
pub fn row_key_strategy(rows: usize) -> impl Strategy<Value = String> {
    (0..rows.max(1)).prop_map(|i| format!("r{i}"))
}

/// Strategy for generating cell values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..16)
}

/// One thing a transaction in a schedule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write a value to a row.
    Write(String, Vec<u8>),
    /// Delete a row.
    Delete(String),
    /// Read a row.
    Read(String),
    /// Commit the transaction.
    Commit,
    /// Roll the transaction back.
    Rollback,
}

/// One step of an interleaved schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Index of the transaction taking the step.
    pub txn: usize,
    /// What it does.
    pub action: Action,
}

/// Strategy for generating a single action on a small key space.
pub fn action_strategy(rows: usize) -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (row_key_strategy(rows), value_strategy()).prop_map(|(r, v)| Action::Write(r, v)),
        1 => row_key_strategy(rows).prop_map(Action::Delete),
        4 => row_key_strategy(rows).prop_map(Action::Read),
        1 => Just(Action::Commit),
        1 => Just(Action::Rollback),
    ]
}

/// Strategy for generating an interleaved schedule of `txns` transactions
/// over `rows` rows.
///
/// Transactions begin at their first step; a transaction that has finished
/// may be restarted by a later step.
pub fn schedule_strategy(
    txns: usize,
    rows: usize,
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        (0..txns.max(1), action_strategy(rows)).prop_map(|(txn, action)| Step { txn, action }),
        len,
    )
}
