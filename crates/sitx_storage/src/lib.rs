//! # sitx Storage
//!
//! Row store abstraction for sitx.
//!
//! This crate is the storage collaborator the snapshot isolation layer is
//! built on. It knows nothing about transactions: it stores versioned cells,
//! runs per-cell filter callbacks during reads, carries opaque attributes on
//! operations, and offers exclusive row locks.
//!
//! ## Design Principles
//!
//! - Narrow trait surface: get, put, scan, lock and unlock a row
//! - Versions are ordinary cell timestamps; the store never interprets them
//! - Attributes ride on operations and are never persisted
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Multi-version store for tests and embedded use
//!
//! ## Example
//!
//! ```rust
//! use sitx_storage::{InMemoryStore, Put, RowStore, Scan};
//!
//! let store = InMemoryStore::new();
//! store.put(&Put::new("a").add("f", "q", "1")).unwrap();
//! store.put(&Put::new("b").add("f", "q", "2")).unwrap();
//! let rows: Vec<_> = store.scan(&Scan::all(), None).unwrap().collect();
//! assert_eq!(rows.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cell;
mod error;
mod filter;
mod lock;
mod memory;
mod operation;
mod store;

pub use cell::{to_string_binary, Attributes, Cell, Timestamp};
pub use error::{StorageError, StorageResult};
pub use filter::{CellFilter, ReturnCode};
pub use lock::{RowLockTable, DEFAULT_LOCK_SHARDS};
pub use memory::{InMemoryStore, DEFAULT_LOCK_TIMEOUT};
pub use operation::{Get, Operation, Put, PutValue, Read, Scan, TimeRange};
pub use store::{RowIter, RowLock, RowResult, RowStore};
