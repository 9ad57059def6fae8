//! Top-level facade crate for netseg.
//!
//! Re-exports the data model and the engine so users can depend on a single crate.

pub mod core {
    pub use netseg_core::*;
}

pub mod engine {
    pub use netseg_engine::*;
}
