//! Apply a declarative config to an engine and check its probes.

use netseg_core::error::Result;

use crate::config::{EngineConfig, ProbeConfig};
use crate::controller::{ConnectionProbe, Engine};
use crate::notify::Notifier;

impl Engine {
    /// Build an engine and load every tenant declared in `cfg`.
    pub fn from_config(cfg: &EngineConfig, notifier: Notifier) -> Result<Self> {
        let engine = Engine::new(cfg.engine.tie_break, notifier);
        apply(&engine, cfg)?;
        Ok(engine)
    }
}

/// Creates, per tenant: networks, policies, groups, rules, endpoints.
/// Groups precede rules because rules may name groups as peers.
pub fn apply(engine: &Engine, cfg: &EngineConfig) -> Result<()> {
    for t in &cfg.tenants {
        if !engine.has_tenant(&t.name) {
            engine.create_tenant(&t.name)?;
        }
        for n in &t.networks {
            engine.create_network(&t.name, n)?;
        }
        for p in &t.policies {
            engine.create_policy(&t.name, &p.name)?;
        }
        for g in &t.groups {
            engine.create_group(&t.name, g)?;
        }
        for p in &t.policies {
            for r in &p.rules {
                engine.add_rule(&t.name, &p.name, r)?;
            }
        }
        for e in &t.endpoints {
            engine.register_endpoint(&t.name, e)?;
        }
        tracing::info!(
            tenant = %t.name,
            networks = t.networks.len(),
            policies = t.policies.len(),
            groups = t.groups.len(),
            endpoints = t.endpoints.len(),
            "tenant loaded"
        );
    }
    Ok(())
}

#[derive(Debug)]
pub struct ProbeFailure {
    pub index: usize,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Default)]
pub struct ProbeReport {
    pub passed: usize,
    pub failed: Vec<ProbeFailure>,
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Evaluate each probe as a connection and compare with its expectation.
/// A probe that errors counts as failed with the error code as its outcome.
pub fn run_probes(engine: &Engine, probes: &[ProbeConfig]) -> ProbeReport {
    let mut report = ProbeReport::default();
    for (index, p) in probes.iter().enumerate() {
        let probe = ConnectionProbe {
            protocol: p.protocol,
            src: p.src,
            dst: p.dst,
            port: p.port,
        };
        let actual = match engine.check_connection(&p.tenant, &probe) {
            Ok(v) if v.verdict == p.expect => {
                report.passed += 1;
                continue;
            }
            Ok(v) => v.verdict.as_str().to_string(),
            Err(e) => e.code().as_str().to_string(),
        };
        tracing::warn!(
            index,
            tenant = %p.tenant,
            protocol = %p.protocol,
            src = %p.src,
            dst = %p.dst,
            port = ?p.port,
            expected = p.expect.as_str(),
            actual = %actual,
            "probe failed"
        );
        report.failed.push(ProbeFailure {
            index,
            expected: p.expect.as_str().to_string(),
            actual,
        });
    }
    report
}
