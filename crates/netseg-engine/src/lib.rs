//! netseg engine library entry.
//!
//! Micro-segmentation policy engine: tenants, networks, endpoint groups,
//! policies and rules held in concurrent in-memory maps, with verdicts
//! computed on demand for the dataplane. Consumed by the binary (`main.rs`)
//! and by integration tests.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod evaluator;
pub mod notify;
pub mod obs;
pub mod resolver;
pub mod store;

pub use controller::{ConnectionProbe, ConnectionVerdict, Engine};
