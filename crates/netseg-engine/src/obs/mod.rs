//! Lightweight in-process metrics.
//!
//! Counters and histograms are stored as atomics and rendered in the
//! Prometheus text format on demand (`Engine::render_metrics`).

pub mod metrics;

pub use metrics::EngineMetrics;
