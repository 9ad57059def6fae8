//! Tenants and networks.
//!
//! Every entity that points at a network (groups, rule peer selectors,
//! registered endpoints) holds a counted reference on it; a network can only
//! be deleted once all counts drop to zero. Counts are updated under the
//! entry's shard guard, so a delete can never interleave with a retain.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::{Network, NetworkKey};

/// Tenant that exists from construction and cannot be deleted.
pub const DEFAULT_TENANT: &str = "default";

/// What holds a reference on a network or endpoint group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// An endpoint group living in the network.
    Group,
    /// A rule naming the entity in its peer selector.
    Peer,
    /// A registered endpoint.
    Endpoint,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefCounts {
    pub groups: usize,
    pub peers: usize,
    pub endpoints: usize,
}

impl RefCounts {
    fn slot(&mut self, kind: RefKind) -> &mut usize {
        match kind {
            RefKind::Group => &mut self.groups,
            RefKind::Peer => &mut self.peers,
            RefKind::Endpoint => &mut self.endpoints,
        }
    }

    pub(crate) fn retain(&mut self, kind: RefKind) {
        *self.slot(kind) += 1;
    }

    pub(crate) fn release(&mut self, kind: RefKind) {
        let slot = self.slot(kind);
        *slot = slot.saturating_sub(1);
    }

    pub fn is_empty(&self) -> bool {
        self.groups == 0 && self.peers == 0 && self.endpoints == 0
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{} group(s), {} rule peer(s), {} endpoint(s)",
            self.groups, self.peers, self.endpoints
        )
    }
}

/// Children a tenant keeps count of.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TenantChild {
    Network,
    Policy,
}

#[derive(Debug, Default)]
struct TenantEntry {
    networks: usize,
    policies: usize,
}

impl TenantEntry {
    fn slot(&mut self, child: TenantChild) -> &mut usize {
        match child {
            TenantChild::Network => &mut self.networks,
            TenantChild::Policy => &mut self.policies,
        }
    }
}

struct NetworkEntry {
    network: Arc<Network>,
    refs: RefCounts,
}

pub struct Catalog {
    tenants: DashMap<String, TenantEntry>,
    networks: DashMap<NetworkKey, NetworkEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let tenants = DashMap::new();
        tenants.insert(DEFAULT_TENANT.to_string(), TenantEntry::default());
        Self {
            tenants,
            networks: DashMap::new(),
        }
    }

    pub fn create_tenant(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(NetSegError::Validation("tenant name must not be empty".into()));
        }
        match self.tenants.entry(name.to_string()) {
            Entry::Occupied(_) => Err(NetSegError::DuplicateId(format!("tenant {name}"))),
            Entry::Vacant(v) => {
                v.insert(TenantEntry::default());
                Ok(())
            }
        }
    }

    pub fn delete_tenant(&self, name: &str) -> Result<()> {
        if name == DEFAULT_TENANT {
            return Err(NetSegError::Validation("the default tenant cannot be deleted".into()));
        }
        if self
            .tenants
            .remove_if(name, |_, t| t.networks == 0 && t.policies == 0)
            .is_some()
        {
            return Ok(());
        }
        match self.tenants.get(name) {
            Some(t) => Err(NetSegError::ReferentialIntegrity(format!(
                "tenant {name} still owns {} network(s) and {} policy(ies)",
                t.networks, t.policies
            ))),
            None => Err(NetSegError::NotFound(format!("tenant {name}"))),
        }
    }

    pub fn has_tenant(&self, name: &str) -> bool {
        self.tenants.contains_key(name)
    }

    pub(crate) fn retain_tenant(&self, name: &str, child: TenantChild) -> Result<()> {
        let mut t = self
            .tenants
            .get_mut(name)
            .ok_or_else(|| NetSegError::NotFound(format!("tenant {name}")))?;
        *t.slot(child) += 1;
        Ok(())
    }

    pub(crate) fn release_tenant(&self, name: &str, child: TenantChild) {
        if let Some(mut t) = self.tenants.get_mut(name) {
            let slot = t.slot(child);
            *slot = slot.saturating_sub(1);
        }
    }

    pub fn create_network(&self, network: Network) -> Result<Arc<Network>> {
        let key = network.key.clone();
        self.retain_tenant(&key.tenant, TenantChild::Network)?;

        match self.networks.entry(key.clone()) {
            Entry::Occupied(_) => {
                self.release_tenant(&key.tenant, TenantChild::Network);
                Err(NetSegError::DuplicateId(format!("network {key}")))
            }
            Entry::Vacant(v) => {
                let network = Arc::new(network);
                v.insert(NetworkEntry {
                    network: Arc::clone(&network),
                    refs: RefCounts::default(),
                });
                Ok(network)
            }
        }
    }

    /// Replace a network's attributes. Rejected once endpoints live in it.
    /// Returns the new network and its reference counts at the time of the swap.
    pub fn update_network(&self, network: Network) -> Result<(Arc<Network>, RefCounts)> {
        let key = network.key.clone();
        let mut entry = self
            .networks
            .get_mut(&key)
            .ok_or_else(|| NetSegError::NotFound(format!("network {key}")))?;
        if entry.refs.endpoints > 0 {
            return Err(NetSegError::ReferentialIntegrity(format!(
                "network {key} is in use by {} endpoint(s)",
                entry.refs.endpoints
            )));
        }
        let network = Arc::new(network);
        entry.network = Arc::clone(&network);
        Ok((network, entry.refs))
    }

    pub fn delete_network(&self, key: &NetworkKey) -> Result<Arc<Network>> {
        if let Some((_, entry)) = self.networks.remove_if(key, |_, e| e.refs.is_empty()) {
            self.release_tenant(&key.tenant, TenantChild::Network);
            return Ok(entry.network);
        }
        match self.networks.get(key) {
            Some(e) => Err(NetSegError::ReferentialIntegrity(format!(
                "network {key} is referenced by {}",
                e.refs.describe()
            ))),
            None => Err(NetSegError::NotFound(format!("network {key}"))),
        }
    }

    pub fn network(&self, key: &NetworkKey) -> Option<Arc<Network>> {
        self.networks.get(key).map(|e| Arc::clone(&e.network))
    }

    /// Networks of a tenant, ordered by name.
    pub fn networks(&self, tenant: &str) -> Vec<Arc<Network>> {
        let mut out: Vec<Arc<Network>> = self
            .networks
            .iter()
            .filter(|e| e.key().tenant == tenant)
            .map(|e| Arc::clone(&e.value().network))
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Take a counted reference; returns the network as of that moment.
    pub(crate) fn retain_network(&self, key: &NetworkKey, kind: RefKind) -> Result<Arc<Network>> {
        let mut entry = self
            .networks
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("network {key}")))?;
        entry.refs.retain(kind);
        Ok(Arc::clone(&entry.network))
    }

    pub(crate) fn release_network(&self, key: &NetworkKey, kind: RefKind) {
        if let Some(mut entry) = self.networks.get_mut(key) {
            entry.refs.release(kind);
        }
    }
}
