//! Networks: subnet, gateway and encapsulation.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::error::{NetSegError, Result};

use super::keys::NetworkKey;

/// Encapsulation mode of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encap {
    Vlan,
    Vxlan,
}

impl Encap {
    pub fn as_str(self) -> &'static str {
        match self {
            Encap::Vlan => "vlan",
            Encap::Vxlan => "vxlan",
        }
    }

    /// Valid encapsulation tags (802.1Q VID / 24-bit VNI).
    pub fn tag_range(self) -> RangeInclusive<u32> {
        match self {
            Encap::Vlan => 1..=4094,
            Encap::Vxlan => 1..=16_777_215,
        }
    }
}

/// Network as supplied by callers.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub name: String,
    /// CIDR, e.g. `10.1.0.0/16`.
    pub subnet: String,
    pub gateway: String,
    pub pkt_tag: u32,
    pub encap: Encap,
}

/// Validated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub key: NetworkKey,
    pub subnet: IpNetwork,
    pub gateway: IpAddr,
    pub pkt_tag: u32,
    pub encap: Encap,
}

impl Network {
    pub fn from_spec(tenant: &str, spec: &NetworkSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(NetSegError::Validation("network name must not be empty".into()));
        }
        if !spec.subnet.contains('/') {
            return Err(NetSegError::Validation(format!(
                "network {}: subnet must be a CIDR: {}",
                spec.name, spec.subnet
            )));
        }
        let subnet: IpNetwork = spec.subnet.parse().map_err(|e| {
            NetSegError::Validation(format!("network {}: invalid subnet {}: {e}", spec.name, spec.subnet))
        })?;
        let gateway: IpAddr = spec.gateway.parse().map_err(|e| {
            NetSegError::Validation(format!("network {}: invalid gateway {}: {e}", spec.name, spec.gateway))
        })?;
        if !subnet.contains(gateway) {
            return Err(NetSegError::Validation(format!(
                "network {}: gateway {gateway} outside subnet {subnet}",
                spec.name
            )));
        }
        if !spec.encap.tag_range().contains(&spec.pkt_tag) {
            return Err(NetSegError::Validation(format!(
                "network {}: pkt_tag {} out of range for {}",
                spec.name,
                spec.pkt_tag,
                spec.encap.as_str()
            )));
        }

        Ok(Self {
            key: NetworkKey::new(tenant, spec.name.clone()),
            subnet,
            gateway,
            pkt_tag: spec.pkt_tag,
            encap: spec.encap,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.subnet.contains(ip)
    }
}
