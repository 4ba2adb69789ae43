//! Random interleaved schedules checked against a reference model of
//! first-committer-wins snapshot isolation.

use proptest::prelude::*;
use sitx_core::{TransactionId, TransactionStatus};
use sitx_testkit::{schedule_strategy, Action, Step, TestTransactor};
use std::collections::HashMap;

/// A transaction the model believes is open.
struct Open {
    id: TransactionId,
    writes: HashMap<String, Option<Vec<u8>>>,
}

/// What the model expects of the store.
#[derive(Default)]
struct Model {
    slots: HashMap<usize, Open>,
    /// Committed versions per row as `(end_timestamp, value)`; `None` is a
    /// delete.
    committed: HashMap<String, Vec<(u64, Option<Vec<u8>>)>>,
    /// Open writers per row.
    pending: HashMap<String, Vec<u64>>,
}

impl Model {
    fn snapshot_value(&self, row: &str, begin: u64) -> Option<Vec<u8>> {
        self.committed
            .get(row)?
            .iter()
            .filter(|(end, _)| *end < begin)
            .max_by_key(|(end, _)| *end)
            .and_then(|(_, value)| value.clone())
    }

    fn expects_conflict(&self, row: &str, writer: u64) -> bool {
        let pending = self
            .pending
            .get(row)
            .is_some_and(|ids| ids.iter().any(|id| *id != writer));
        let committed_since = self
            .committed
            .get(row)
            .is_some_and(|versions| versions.iter().any(|(end, _)| *end >= writer));
        pending || committed_since
    }

    fn close(&mut self, slot: usize) -> Option<Open> {
        let open = self.slots.remove(&slot)?;
        for row in open.writes.keys() {
            if let Some(ids) = self.pending.get_mut(row) {
                ids.retain(|id| *id != open.id.id());
            }
        }
        Some(open)
    }
}

fn run_schedule(schedule: &[Step]) -> Result<(), TestCaseError> {
    let t = TestTransactor::memory();
    let mut model = Model::default();

    for step in schedule {
        let id = match model.slots.get(&step.txn) {
            Some(open) => open.id,
            None => {
                let id = t.begin();
                model.slots.insert(
                    step.txn,
                    Open {
                        id,
                        writes: HashMap::new(),
                    },
                );
                id
            }
        };

        match &step.action {
            Action::Write(row, _) | Action::Delete(row) => {
                let value = match &step.action {
                    Action::Write(_, value) => Some(value.clone()),
                    _ => None,
                };
                let conflict = model.expects_conflict(row, id.id());
                let result = match &value {
                    Some(v) => t.write(id, row, v.clone()),
                    None => t.delete(id, row),
                };
                if conflict {
                    let err = result.expect_err("expected a write conflict");
                    prop_assert!(err.is_write_conflict(), "unexpected error: {}", err);
                    prop_assert_eq!(t.status(id), TransactionStatus::Error);
                    model.close(step.txn);
                } else {
                    result.map_err(|e| TestCaseError::fail(e.to_string()))?;
                    let pending = model.pending.entry(row.clone()).or_default();
                    if !pending.contains(&id.id()) {
                        pending.push(id.id());
                    }
                    if let Some(open) = model.slots.get_mut(&step.txn) {
                        open.writes.insert(row.clone(), value);
                    }
                }
            }
            Action::Read(row) => {
                let expected = match model.slots.get(&step.txn).and_then(|o| o.writes.get(row)) {
                    Some(own) => own.clone(),
                    None => model.snapshot_value(row, id.id()),
                };
                let actual = t
                    .read(id, row)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .map(|b| b.to_vec());
                prop_assert_eq!(actual, expected, "read of {} by {}", row, id);
            }
            Action::Commit => {
                t.transactor
                    .commit(id)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let end = t.end_timestamp(id).expect("committed without end timestamp");
                if let Some(open) = model.close(step.txn) {
                    for (row, value) in open.writes {
                        model.committed.entry(row).or_default().push((end, value));
                    }
                }
            }
            Action::Rollback => {
                t.transactor
                    .rollback(id)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(t.status(id), TransactionStatus::RolledBack);
                model.close(step.txn);
            }
        }
    }

    // A final reader sees exactly the latest committed state.
    let reader = t.begin_read_only();
    let mut rows: Vec<&String> = model.committed.keys().collect();
    rows.sort();
    for row in rows {
        let expected = model.snapshot_value(row, reader.id());
        let actual = t
            .read(reader, row)
            .map_err(|e| TestCaseError::fail(e.to_string()))?
            .map(|b| b.to_vec());
        prop_assert_eq!(actual, expected, "final read of {}", row);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn schedules_match_the_model(schedule in schedule_strategy(3, 2, 1..40)) {
        run_schedule(&schedule)?;
    }

    #[test]
    fn wide_schedules_match_the_model(schedule in schedule_strategy(5, 4, 10..60)) {
        run_schedule(&schedule)?;
    }
}
