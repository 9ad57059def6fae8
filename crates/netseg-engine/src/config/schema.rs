use std::collections::HashSet;
use std::net::IpAddr;

use serde::Deserialize;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::{EndpointSpec, GroupSpec, NetworkSpec, Protocol, RuleSpec, TieBreak, Verdict};

use crate::catalog::DEFAULT_TENANT;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    /// Connectivity expectations checked after bootstrap.
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(NetSegError::UnsupportedVersion);
        }

        self.engine.validate()?;

        let mut seen = HashSet::new();
        for t in &self.tenants {
            if t.name.trim().is_empty() {
                return Err(NetSegError::Validation("tenants[].name must not be empty".into()));
            }
            if !seen.insert(t.name.as_str()) {
                return Err(NetSegError::Validation(format!("tenant {} declared twice", t.name)));
            }
        }

        for p in &self.probes {
            if p.port.is_some() && !p.protocol.has_ports() {
                return Err(NetSegError::Validation(format!(
                    "probe {} -> {}: protocol {} has no ports",
                    p.src, p.dst, p.protocol
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Winner among matching rules of equal top priority.
    #[serde(default)]
    pub tie_break: TieBreak,

    #[serde(default = "default_notify_queue_capacity")]
    pub notify_queue_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::default(),
            notify_queue_capacity: default_notify_queue_capacity(),
        }
    }
}

impl EngineSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.notify_queue_capacity) {
            return Err(NetSegError::Validation(
                "engine.notify_queue_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_notify_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    pub name: String,
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default = "default_tenant")]
    pub tenant: String,
    pub protocol: Protocol,
    pub src: IpAddr,
    pub dst: IpAddr,
    #[serde(default)]
    pub port: Option<u16>,
    pub expect: Verdict,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.into()
}
