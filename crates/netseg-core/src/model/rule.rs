//! Rules: a single priority-ranked allow/deny directive.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{NetSegError, Result};

use super::selector::PeerSelector;

/// Direction relative to the endpoint the owning policy is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = NetSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(NetSegError::Validation(format!("unsupported direction: {other}"))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Whether the protocol has a port dimension.
    pub fn has_ports(self) -> bool {
        !matches!(self, Protocol::Icmp)
    }
}

impl FromStr for Protocol {
    type Err = NetSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            other => Err(NetSegError::Validation(format!("unsupported protocol: {other}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

impl FromStr for Action {
    type Err = NetSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            other => Err(NetSegError::Validation(format!("unsupported action: {other}"))),
        }
    }
}

/// Rule as supplied by callers (API body / config entry).
///
/// Inbound rules name their peer with `from_*` fields, outbound rules with
/// `to_*` fields. Unset and empty fields are equivalent; a port of 0 means
/// any port.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub rule_id: String,
    pub direction: Direction,
    #[serde(default)]
    pub priority: Option<u32>,
    pub protocol: Protocol,
    #[serde(default)]
    pub port: Option<u16>,
    pub action: Action,

    #[serde(default)]
    pub from_network: Option<String>,
    #[serde(default)]
    pub from_endpoint_group: Option<String>,
    #[serde(default)]
    pub from_ip_address: Option<String>,
    #[serde(default)]
    pub to_network: Option<String>,
    #[serde(default)]
    pub to_endpoint_group: Option<String>,
    #[serde(default)]
    pub to_ip_address: Option<String>,
}

impl RuleSpec {
    pub fn new(
        rule_id: impl Into<String>,
        direction: Direction,
        protocol: Protocol,
        action: Action,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            direction,
            priority: None,
            protocol,
            port: None,
            action,
            from_network: None,
            from_endpoint_group: None,
            from_ip_address: None,
            to_network: None,
            to_endpoint_group: None,
            to_ip_address: None,
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn from_network(mut self, network: impl Into<String>) -> Self {
        self.from_network = Some(network.into());
        self
    }

    pub fn from_group(mut self, network: impl Into<String>, group: impl Into<String>) -> Self {
        self.from_network = Some(network.into());
        self.from_endpoint_group = Some(group.into());
        self
    }

    pub fn from_ip(mut self, ip: impl Into<String>) -> Self {
        self.from_ip_address = Some(ip.into());
        self
    }

    pub fn to_network(mut self, network: impl Into<String>) -> Self {
        self.to_network = Some(network.into());
        self
    }

    pub fn to_group(mut self, network: impl Into<String>, group: impl Into<String>) -> Self {
        self.to_network = Some(network.into());
        self.to_endpoint_group = Some(group.into());
        self
    }

    pub fn to_ip(mut self, ip: impl Into<String>) -> Self {
        self.to_ip_address = Some(ip.into());
        self
    }
}

/// Validated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: String,
    pub direction: Direction,
    /// Precedence rank; higher wins. Unset is 0.
    pub priority: u32,
    pub protocol: Protocol,
    /// `None` matches every port.
    pub port: Option<u16>,
    pub action: Action,
    pub peer: PeerSelector,
}

impl Rule {
    pub fn from_spec(spec: &RuleSpec) -> Result<Self> {
        let id = spec.rule_id.as_str();
        if id.is_empty() {
            return Err(NetSegError::Validation("rule_id must not be empty".into()));
        }
        if id.trim() != id {
            return Err(NetSegError::Validation(format!(
                "rule_id {id:?} must not have surrounding whitespace"
            )));
        }

        let (own, other, other_side) = match spec.direction {
            Direction::In => (
                [&spec.from_network, &spec.from_endpoint_group, &spec.from_ip_address],
                [&spec.to_network, &spec.to_endpoint_group, &spec.to_ip_address],
                "to",
            ),
            Direction::Out => (
                [&spec.to_network, &spec.to_endpoint_group, &spec.to_ip_address],
                [&spec.from_network, &spec.from_endpoint_group, &spec.from_ip_address],
                "from",
            ),
        };
        if other.iter().any(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty())) {
            return Err(NetSegError::Validation(format!(
                "rule {id}: {other_side}_* selectors are not valid on a {} rule",
                spec.direction
            )));
        }
        let peer = PeerSelector::from_fields(own[0].as_deref(), own[1].as_deref(), own[2].as_deref())
            .map_err(|e| NetSegError::Validation(format!("rule {id}: {e}")))?;

        let port = spec.port.filter(|p| *p != 0);
        if port.is_some() && !spec.protocol.has_ports() {
            return Err(NetSegError::Validation(format!(
                "rule {id}: protocol {} has no ports",
                spec.protocol
            )));
        }

        Ok(Self {
            id: id.to_string(),
            direction: spec.direction,
            priority: spec.priority.unwrap_or(0),
            protocol: spec.protocol,
            port,
            action: spec.action,
            peer,
        })
    }

    /// Direction, protocol and port filter (peer matching is done by the engine).
    pub fn applies_to(&self, direction: Direction, protocol: Protocol, port: Option<u16>) -> bool {
        if self.direction != direction || self.protocol != protocol {
            return false;
        }
        if !protocol.has_ports() {
            return true;
        }
        match self.port {
            None => true,
            Some(p) => port == Some(p),
        }
    }
}
