//! In-process sharded row lock table.

use crate::cell::to_string_binary;
use crate::error::{StorageError, StorageResult};
use crate::store::RowLock;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default number of shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

#[derive(Debug, Default)]
struct LockShard {
    /// Row -> fencing token of the current holder.
    held: Mutex<HashMap<Bytes, u64>>,
    released: Condvar,
}

/// Exclusive per-row locks for stores without native row locking.
///
/// Rows are spread over shards by hash; waiters block on their shard's
/// condition variable. Every grant gets a fresh fencing token so a stale
/// handle can never be mistaken for the current holder.
#[derive(Debug)]
pub struct RowLockTable {
    shards: Vec<LockShard>,
    next_lock_id: AtomicU64,
    timeout: Duration,
}

impl RowLockTable {
    /// Creates a lock table with the given acquisition timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_shards(DEFAULT_LOCK_SHARDS, timeout)
    }

    /// Creates a lock table with an explicit shard count.
    #[must_use]
    pub fn with_shards(shards: usize, timeout: Duration) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| LockShard::default()).collect(),
            next_lock_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Returns the acquisition timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn shard(&self, row: &[u8]) -> &LockShard {
        let mut hasher = DefaultHasher::new();
        row.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Blocks until the row is free, then takes it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the row stays locked for
    /// longer than the table's timeout.
    pub fn acquire(&self, row: &[u8]) -> StorageResult<RowLock> {
        let shard = self.shard(row);
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut held = shard.held.lock();
        while held.contains_key(row) {
            if shard.released.wait_until(&mut held, deadline).timed_out() && held.contains_key(row)
            {
                return Err(StorageError::LockTimeout {
                    row: to_string_binary(row),
                    waited: started.elapsed(),
                });
            }
        }

        let lock_id = self.next_lock_id.fetch_add(1, Ordering::SeqCst);
        let row = Bytes::copy_from_slice(row);
        held.insert(row.clone(), lock_id);
        Ok(RowLock::new(row, lock_id))
    }

    /// Releases a lock and wakes waiters on its shard.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockNotHeld`] if the handle is stale.
    pub fn release(&self, lock: &RowLock) -> StorageResult<()> {
        let shard = self.shard(lock.row());
        let mut held = shard.held.lock();
        if held.get(lock.row()) != Some(&lock.lock_id()) {
            return Err(Self::not_held(lock));
        }
        held.remove(lock.row());
        drop(held);
        shard.released.notify_all();
        Ok(())
    }

    /// Checks that a handle is the current holder of its row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockNotHeld`] if it is not.
    pub fn validate(&self, lock: &RowLock) -> StorageResult<()> {
        let held = self.shard(lock.row()).held.lock();
        if held.get(lock.row()) == Some(&lock.lock_id()) {
            Ok(())
        } else {
            Err(Self::not_held(lock))
        }
    }

    /// Returns true if some handle currently holds the row.
    #[must_use]
    pub fn is_locked(&self, row: &[u8]) -> bool {
        self.shard(row).held.lock().contains_key(row)
    }

    fn not_held(lock: &RowLock) -> StorageError {
        StorageError::LockNotHeld {
            row: to_string_binary(lock.row()),
            lock_id: lock.lock_id(),
        }
    }
}
