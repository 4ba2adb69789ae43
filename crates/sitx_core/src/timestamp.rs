//! Timestamp sources.
//!
//! Timestamps identify transactions and mark their begin and commit
//! instants, so a source must hand out strictly increasing values and never
//! repeat one, not even across a restart. Exhaustion is an error rather
//! than a wrap.
//!
//! ```text
//! <path>     # 8 bytes, big-endian: highest timestamp that may have been issued
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Default number of timestamps reserved per durable write.
pub const DEFAULT_BLOCK_SIZE: u64 = 1_000;

/// A source of unique, strictly increasing timestamps.
pub trait TimestampSource: Send + Sync {
    /// Issues the next timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TimestampExhausted`] when no timestamp is left,
    /// or another error if the source cannot guarantee uniqueness. Callers
    /// must not retry.
    fn next_timestamp(&self) -> CoreResult<u64>;
}

/// In-process counter.
///
/// Suitable for tests and for embedded use where the transaction table does
/// not outlive the process.
#[derive(Debug, Default)]
pub struct SimpleTimestampSource {
    last: AtomicU64,
}

impl SimpleTimestampSource {
    /// Creates a source whose first timestamp is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source whose first timestamp follows `last`.
    #[must_use]
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

impl TimestampSource for SimpleTimestampSource {
    fn next_timestamp(&self) -> CoreResult<u64> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .map(|previous| previous + 1)
            .map_err(|_| CoreError::TimestampExhausted)
    }
}

/// File-backed timestamp source.
///
/// Timestamps are reserved in blocks: before handing out any timestamp
/// above the persisted high-water mark, the mark is raised by the block size
/// and synced. After a restart the source resumes above the persisted mark,
/// so timestamps reserved but never issued are skipped, never reused.
///
/// The file is held under an exclusive advisory lock for the lifetime of
/// the source.
#[derive(Debug)]
pub struct PersistentTimestampSource {
    path: PathBuf,
    block_size: u64,
    state: Mutex<PersistentState>,
}

#[derive(Debug)]
struct PersistentState {
    file: File,
    last: u64,
    reserved: u64,
}

impl PersistentTimestampSource {
    /// Opens or creates a source with the default block size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is locked by another
    /// process, or does not hold a valid high-water mark.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    /// Opens or creates a source reserving `block_size` timestamps per
    /// durable write.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open); also rejects a block size of zero.
    pub fn open_with_block_size(path: impl AsRef<Path>, block_size: u64) -> CoreResult<Self> {
        if block_size == 0 {
            return Err(CoreError::invalid_operation("block size must be positive"));
        }
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::timestamp_source(format!(
                "{} is locked by another process",
                path.display()
            )));
        }

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let mark = match contents.len() {
            0 => 0,
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&contents);
                u64::from_be_bytes(raw)
            }
            len => {
                return Err(CoreError::corrupted(format!(
                    "timestamp file {} has {len} bytes, expected 8",
                    path.display()
                )))
            }
        };

        info!(path = %path.display(), high_water_mark = mark, "opened timestamp source");
        Ok(Self {
            path,
            block_size,
            state: Mutex::new(PersistentState {
                file,
                last: mark,
                reserved: mark,
            }),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the highest timestamp reserved so far.
    #[must_use]
    pub fn high_water_mark(&self) -> u64 {
        self.state.lock().reserved
    }
}

impl PersistentState {
    fn reserve(&mut self, mark: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&mark.to_be_bytes())?;
        self.file.sync_data()?;
        self.reserved = mark;
        Ok(())
    }
}

impl TimestampSource for PersistentTimestampSource {
    fn next_timestamp(&self) -> CoreResult<u64> {
        let mut state = self.state.lock();
        let next = state
            .last
            .checked_add(1)
            .ok_or(CoreError::TimestampExhausted)?;
        if next > state.reserved {
            let mark = state.reserved.saturating_add(self.block_size);
            state.reserve(mark).map_err(|err| {
                CoreError::timestamp_source(format!(
                    "cannot reserve timestamps up to {mark}: {err}"
                ))
            })?;
            info!(high_water_mark = mark, "reserved timestamp block");
        }
        state.last = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn failed_reservation_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TS");
        std::fs::write(&path, 0u64.to_be_bytes()).unwrap();
        // A read-only handle makes the durable write fail.
        let source = PersistentTimestampSource {
            path: path.clone(),
            block_size: 4,
            state: Mutex::new(PersistentState {
                file: File::open(&path).unwrap(),
                last: 0,
                reserved: 0,
            }),
        };

        let err = source.next_timestamp().unwrap_err();
        assert!(matches!(err, CoreError::TimestampSource { .. }));
        assert!(!err.is_retryable());
        assert_eq!(source.high_water_mark(), 0);
    }

    #[test]
    fn simple_source_starts_at_one() {
        let source = SimpleTimestampSource::new();
        assert_eq!(source.next_timestamp().unwrap(), 1);
        assert_eq!(source.next_timestamp().unwrap(), 2);
    }

    #[test]
    fn simple_source_does_not_wrap() {
        let source = SimpleTimestampSource::starting_after(u64::MAX - 1);
        assert_eq!(source.next_timestamp().unwrap(), u64::MAX);
        assert!(matches!(
            source.next_timestamp(),
            Err(CoreError::TimestampExhausted)
        ));
        assert!(matches!(
            source.next_timestamp(),
            Err(CoreError::TimestampExhausted)
        ));
    }

    #[test]
    fn simple_source_unique_across_threads() {
        let source = Arc::new(SimpleTimestampSource::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    (0..500)
                        .map(|_| source.next_timestamp().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "timestamp {ts} issued twice");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn persistent_source_reserves_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TIMESTAMP");
        let source = PersistentTimestampSource::open_with_block_size(&path, 10).unwrap();

        assert_eq!(source.next_timestamp().unwrap(), 1);
        assert_eq!(source.high_water_mark(), 10);
        for expected in 2..=11 {
            assert_eq!(source.next_timestamp().unwrap(), expected);
        }
        assert_eq!(source.high_water_mark(), 20);
        assert_eq!(std::fs::read(&path).unwrap(), 20u64.to_be_bytes());
    }

    #[test]
    fn persistent_source_resumes_above_mark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TIMESTAMP");
        let last = {
            let source = PersistentTimestampSource::open_with_block_size(&path, 100).unwrap();
            source.next_timestamp().unwrap();
            source.next_timestamp().unwrap()
        };

        let source = PersistentTimestampSource::open_with_block_size(&path, 100).unwrap();
        let next = source.next_timestamp().unwrap();
        assert!(next > last);
        assert_eq!(next, 101);
    }

    #[test]
    fn persistent_source_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TIMESTAMP");
        let _first = PersistentTimestampSource::open(&path).unwrap();
        assert!(matches!(
            PersistentTimestampSource::open(&path),
            Err(CoreError::TimestampSource { .. })
        ));
    }

    #[test]
    fn persistent_source_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TIMESTAMP");
        std::fs::write(&path, b"abc").unwrap();
        assert!(matches!(
            PersistentTimestampSource::open(&path),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn zero_block_size_rejected() {
        let dir = tempdir().unwrap();
        assert!(PersistentTimestampSource::open_with_block_size(dir.path().join("T"), 0).is_err());
    }

    proptest! {
        #[test]
        fn persistent_source_strictly_increasing(block in 1u64..16, count in 1usize..64) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("TS");
            let source = PersistentTimestampSource::open_with_block_size(path, block).unwrap();
            let mut previous = 0;
            for _ in 0..count {
                let ts = source.next_timestamp().unwrap();
                prop_assert!(ts > previous);
                prop_assert!(ts <= source.high_water_mark());
                previous = ts;
            }
        }
    }
}
