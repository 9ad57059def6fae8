//! Endpoint groups and endpoint registrations as supplied by callers.

use std::net::IpAddr;

use serde::Deserialize;

/// Endpoint group: a membership class inside one network.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    pub network: String,
    /// Attached policy names, in attach order.
    #[serde(default)]
    pub policies: Vec<String>,
}

impl GroupSpec {
    pub fn new(network: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
            policies: Vec::new(),
        }
    }

    pub fn with_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies = policies.into_iter().map(Into::into).collect();
        self
    }
}

/// A live workload registered by the provisioning collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub ip: IpAddr,
    pub network: String,
    pub group: String,
}

impl EndpointSpec {
    pub fn new(ip: IpAddr, network: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            ip,
            network: network.into(),
            group: group.into(),
        }
    }
}
