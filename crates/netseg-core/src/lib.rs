//! netseg core: policy data model, peer selectors, flow descriptors and the
//! shared error type.
//!
//! This crate carries no runtime or storage dependencies. The engine crate
//! owns state and concurrency; everything here is plain data plus the
//! validation that turns caller-supplied specs into well-formed values.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `NetSegError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod model;

/// Shared result type.
pub use error::{ErrorCode, NetSegError, Result};
