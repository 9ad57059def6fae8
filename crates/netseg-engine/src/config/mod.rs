//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use netseg_core::error::{NetSegError, Result};

pub use schema::{EngineConfig, EngineSection, PolicyConfig, ProbeConfig, TenantConfig};

pub fn load_from_file(path: &str) -> Result<EngineConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| NetSegError::Internal(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig = serde_yaml::from_str(s)
        .map_err(|e| NetSegError::Validation(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
