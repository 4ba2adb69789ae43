//! Transaction records and their durable store.
//!
//! A transaction moves through the states of [`TransactionStatus`]. Its
//! record lives in a dedicated transaction table managed by
//! [`TransactionStore`]; conflict checks and visibility decisions work from
//! the cacheable [`ImmutableTransaction`] projection plus the record's
//! current status.

mod cache;
mod state;
mod store;

pub use state::{
    EffectiveState, ImmutableTransaction, TransactionParams, TransactionRecord, TransactionStatus,
};
pub use store::TransactionStore;
