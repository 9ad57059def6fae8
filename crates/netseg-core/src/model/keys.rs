//! Tenant-scoped identifiers.

use std::fmt;

/// (tenant, network)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkKey {
    pub tenant: String,
    pub network: String,
}

impl NetworkKey {
    pub fn new(tenant: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            network: network.into(),
        }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.network)
    }
}

/// (tenant, policy)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    pub tenant: String,
    pub policy: String,
}

impl PolicyKey {
    pub fn new(tenant: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            policy: policy.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.policy)
    }
}

/// (tenant, network, group)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub tenant: String,
    pub network: String,
    pub group: String,
}

impl GroupKey {
    pub fn new(
        tenant: impl Into<String>,
        network: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            network: network.into(),
            group: group.into(),
        }
    }

    /// Key of the network owning this group.
    pub fn network_key(&self) -> NetworkKey {
        NetworkKey::new(self.tenant.clone(), self.network.clone())
    }

    /// Key of a policy in the same tenant.
    pub fn policy_key(&self, policy: &str) -> PolicyKey {
        PolicyKey::new(self.tenant.clone(), policy)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.network, self.group)
    }
}
