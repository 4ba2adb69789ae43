//! Stress harnesses for the transactor.
//!
//! These runs verify behaviour under concurrent contention.

use crate::fixtures::TestTransactor;
use bytes::Bytes;
use sitx_core::CoreResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that lost a write/write conflict and were retried.
    pub conflicts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Committed transactions per second.
    pub commits_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(committed: usize, conflicts: usize, duration: Duration) -> Self {
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            committed,
            conflicts,
            duration,
            commits_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Conflicts: {}", self.conflicts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Increments each thread must commit.
    pub increments_per_thread: usize,
    /// Number of counter rows the increments are spread over.
    pub rows: usize,
    /// Attempts per increment before the run gives up.
    pub max_attempts: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            increments_per_thread: 50,
            rows: 2,
            max_attempts: 10_000,
        }
    }
}

/// Name of the `i`th counter row.
pub fn counter_row(i: usize) -> String {
    format!("counter-{i}")
}

/// Decodes a counter value; a missing value counts as zero.
pub fn decode_counter(value: Option<&Bytes>) -> u64 {
    value
        .and_then(|v| <[u8; 8]>::try_from(v.as_ref()).ok())
        .map_or(0, u64::from_be_bytes)
}

/// Reads every counter as seen by a fresh reader and returns their sum.
pub fn counter_total(fixture: &TestTransactor, rows: usize) -> CoreResult<u64> {
    let reader = fixture.begin_read_only();
    let mut total = 0;
    for i in 0..rows {
        total += decode_counter(fixture.read(reader, &counter_row(i))?.as_ref());
    }
    Ok(total)
}

/// Runs read-increment-write transactions on shared counters from many
/// threads, retrying each one after a write conflict.
///
/// Snapshot isolation forbids lost updates, so afterwards the counters must
/// sum to exactly `threads * increments_per_thread`.
///
/// # Panics
///
/// Panics if an increment needs more than `max_attempts` attempts, or on
/// any error other than a write conflict.
pub fn run_concurrent_increments(
    fixture: &TestTransactor,
    config: &StressConfig,
) -> StressTestResult {
    let committed = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for thread_id in 0..config.threads {
            let committed = &committed;
            let conflicts = &conflicts;
            scope.spawn(move || {
                for i in 0..config.increments_per_thread {
                    let row = counter_row((thread_id + i) % config.rows.max(1));
                    let mut attempts = 0;
                    loop {
                        attempts += 1;
                        assert!(
                            attempts <= config.max_attempts,
                            "increment of {row} did not commit after {} attempts",
                            config.max_attempts
                        );
                        match increment(fixture, &row) {
                            Ok(()) => {
                                committed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(err) if err.is_write_conflict() => {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                                thread::yield_now();
                            }
                            Err(err) => panic!("increment failed: {err}"),
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        committed.load(Ordering::Relaxed),
        conflicts.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn increment(fixture: &TestTransactor, row: &str) -> CoreResult<()> {
    let txn = fixture.begin();
    let current = decode_counter(fixture.read(txn, row)?.as_ref());
    let next = Bytes::copy_from_slice(&(current + 1).to_be_bytes());
    if let Err(err) = fixture.write(txn, row, next) {
        fixture.transactor.rollback(txn)?;
        return Err(err);
    }
    fixture.transactor.commit(txn)
}
