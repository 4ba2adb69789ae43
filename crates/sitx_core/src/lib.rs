//! # sitx Core
//!
//! Snapshot isolation for a multi-version row store.
//!
//! This crate provides:
//! - Timestamp sources issuing transaction ids and commit instants
//! - A durable transaction table built on single-row atomic updates
//! - The [`SiTransactor`]: transaction lifecycle, conflict-checked writes
//!   and per-reader visibility filtering
//! - [`TransactionalTable`], which routes a table's operations through the
//!   transactor
//!
//! ## Example
//!
//! ```rust
//! use sitx_core::{SiTransactor, SimpleTimestampSource, TransactionalTable, TransactorConfig};
//! use sitx_storage::{Get, InMemoryStore, Put};
//! use std::sync::Arc;
//!
//! let transactor = Arc::new(SiTransactor::new(
//!     TransactorConfig::default(),
//!     Arc::new(SimpleTimestampSource::new()),
//!     Arc::new(InMemoryStore::new()),
//! ));
//! let table = TransactionalTable::new(Arc::new(InMemoryStore::new()), Arc::clone(&transactor));
//!
//! let txn = transactor.begin_transaction(true, false, false).unwrap();
//! let mut put = Put::new("r1").add("attributes", "name", "v1");
//! transactor.initialize_put(txn, &mut put);
//! table.put(&put).unwrap();
//! transactor.commit(txn).unwrap();
//!
//! let reader = transactor.begin_transaction(false, false, false).unwrap();
//! let mut get = Get::new("r1");
//! transactor.initialize_get(reader, &mut get);
//! let cells = table.get(&get).unwrap();
//! assert_eq!(cells[0].value().as_ref(), b"v1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod data_store;
mod error;
mod filter;
mod stats;
mod table;
mod timestamp;
mod transaction;
mod transactor;
mod types;

pub use config::{TransactionSchema, TransactorConfig};
pub use data_store::{CellKind, DataStore, SiMarkers};
pub use error::{CoreError, CoreResult};
pub use filter::FilterState;
pub use stats::{StatsSnapshot, TransactorStats};
pub use table::TransactionalTable;
pub use timestamp::{
    PersistentTimestampSource, SimpleTimestampSource, TimestampSource, DEFAULT_BLOCK_SIZE,
};
pub use transaction::{
    EffectiveState, ImmutableTransaction, TransactionParams, TransactionRecord, TransactionStatus,
    TransactionStore,
};
pub use transactor::SiTransactor;
pub use types::{TransactionId, INDEPENDENT_READ_ONLY_SUFFIX};
