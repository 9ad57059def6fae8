//! netseg engine (standalone)
//!
//! Loads a bootstrap file (first argument, default `netseg.yaml`), applies it,
//! runs the declared connectivity probes and exits non-zero on any mismatch.
//! Policy change events are drained into a logging sink.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use netseg_engine::notify::{self, LoggingSink, Notifier};
use netseg_engine::{bootstrap, config, Engine};

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "netseg.yaml".to_string());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, error = %e, "config load failed");
            return ExitCode::FAILURE;
        }
    };

    let (notifier, rx) = Notifier::channel(cfg.engine.notify_queue_capacity);
    let dispatch = tokio::spawn(notify::run_dispatch(rx, Arc::new(LoggingSink)));

    let engine = match Engine::from_config(&cfg, notifier) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(%path, error = %e, code = e.code().as_str(), "bootstrap failed");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%path, tie_break = ?engine.tie_break(), "netseg engine loaded");

    let report = bootstrap::run_probes(&engine, &cfg.probes);
    tracing::info!(passed = report.passed, failed = report.failed.len(), "probes finished");
    tracing::debug!(metrics = %engine.render_metrics(), "metrics");

    // Last sender goes with the engine; the dispatcher then drains and exits.
    drop(engine);
    match dispatch.await {
        Ok(delivered) => tracing::info!(delivered, "dataplane notifications delivered"),
        Err(e) => tracing::warn!(error = %e, "dispatch task failed"),
    }

    if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
