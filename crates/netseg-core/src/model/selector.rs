//! Peer selectors: which remote endpoints a rule applies to.

use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::{NetSegError, Result};

/// Remote side of a flow a rule matches against. Exactly one kind is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSelector {
    /// Wildcard peer.
    Any,
    /// Any address inside the named network's subnet.
    Network(String),
    /// Members of `group` whose address lies inside `network`.
    GroupInNetwork { group: String, network: String },
    /// A literal address (host prefix) or CIDR.
    IpOrCidr(IpNetwork),
}

impl PeerSelector {
    /// Build a selector from the optional network/group/ip fields of a rule.
    /// Empty strings count as unset.
    pub fn from_fields(
        network: Option<&str>,
        group: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Self> {
        fn set(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }

        match (set(network), set(group), set(ip)) {
            (None, None, None) => Ok(PeerSelector::Any),
            (Some(n), None, None) => Ok(PeerSelector::Network(n.to_string())),
            (Some(n), Some(g), None) => Ok(PeerSelector::GroupInNetwork {
                group: g.to_string(),
                network: n.to_string(),
            }),
            (None, Some(g), None) => Err(NetSegError::Validation(format!(
                "endpoint group selector {g} requires its network"
            ))),
            (None, None, Some(ip)) => Ok(PeerSelector::IpOrCidr(parse_ip_or_cidr(ip)?)),
            (_, _, Some(ip)) => Err(NetSegError::Validation(format!(
                "ip address selector {ip} cannot be combined with network or endpoint group"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerSelector::Any => "any",
            PeerSelector::Network(_) => "network",
            PeerSelector::GroupInNetwork { .. } => "group",
            PeerSelector::IpOrCidr(_) => "ip",
        }
    }

    /// Network named by the selector, if any (for referential checks).
    pub fn network(&self) -> Option<&str> {
        match self {
            PeerSelector::Network(n) => Some(n),
            PeerSelector::GroupInNetwork { network, .. } => Some(network),
            _ => None,
        }
    }

    /// (network, group) named by the selector, if any.
    pub fn group(&self) -> Option<(&str, &str)> {
        match self {
            PeerSelector::GroupInNetwork { group, network } => Some((network, group)),
            _ => None,
        }
    }
}

impl fmt::Display for PeerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerSelector::Any => f.write_str("*"),
            PeerSelector::Network(n) => write!(f, "network:{n}"),
            PeerSelector::GroupInNetwork { group, network } => write!(f, "group:{network}/{group}"),
            PeerSelector::IpOrCidr(net) => write!(f, "ip:{net}"),
        }
    }
}

/// Parse `10.1.0.5` (host) or `20.1.0.0/16` (CIDR).
pub fn parse_ip_or_cidr(raw: &str) -> Result<IpNetwork> {
    if raw.contains('/') {
        return raw
            .parse::<IpNetwork>()
            .map_err(|e| NetSegError::Validation(format!("invalid cidr {raw}: {e}")));
    }

    let addr: IpAddr = raw
        .parse()
        .map_err(|e| NetSegError::Validation(format!("invalid ip address {raw}: {e}")))?;
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    IpNetwork::new(addr, prefix)
        .map_err(|e| NetSegError::Validation(format!("invalid ip address {raw}: {e}")))
}
