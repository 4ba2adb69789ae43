//! # sitx Testkit
//!
//! Test utilities for sitx.
//!
//! This crate provides:
//! - Fixtures wiring a transactor to in-memory stores
//! - Property-based test generators using proptest
//! - Concurrent stress harnesses
//!
//! ## Usage
//!
//! ```rust
//! use sitx_testkit::prelude::*;
//!
//! with_transactor(|t| {
//!     let writer = t.begin();
//!     t.write(writer, "r1", "v1").unwrap();
//!     t.transactor.commit(writer).unwrap();
//!
//!     let reader = t.begin_read_only();
//!     assert!(t.read(reader, "r1").unwrap().is_some());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
