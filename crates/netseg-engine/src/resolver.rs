//! Membership index and peer selector resolution.

use std::net::IpAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::{FlowEndpoint, NetworkKey, PeerSelector};

use crate::catalog::Catalog;

/// Where a registered endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub network: String,
    pub group: String,
}

/// (tenant, ip) -> endpoint record.
#[derive(Default)]
pub struct Membership {
    endpoints: DashMap<(String, IpAddr), EndpointRecord>,
}

impl Membership {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
        }
    }

    pub fn insert(&self, tenant: &str, ip: IpAddr, record: EndpointRecord) -> Result<()> {
        match self.endpoints.entry((tenant.to_string(), ip)) {
            Entry::Occupied(o) => Err(NetSegError::DuplicateId(format!(
                "endpoint {ip} in tenant {tenant} already registered to {}/{}",
                o.get().network,
                o.get().group
            ))),
            Entry::Vacant(v) => {
                v.insert(record);
                Ok(())
            }
        }
    }

    pub fn remove(&self, tenant: &str, ip: IpAddr) -> Result<EndpointRecord> {
        self.endpoints
            .remove(&(tenant.to_string(), ip))
            .map(|(_, r)| r)
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint {ip} in tenant {tenant}")))
    }

    pub fn lookup(&self, tenant: &str, ip: IpAddr) -> Option<EndpointRecord> {
        self.endpoints
            .get(&(tenant.to_string(), ip))
            .map(|r| r.value().clone())
    }
}

/// Answers "is this remote endpoint selected by that peer selector" against
/// live catalog and membership state. Nothing is cached.
#[derive(Clone, Copy)]
pub struct SelectorResolver<'a> {
    catalog: &'a Catalog,
    membership: &'a Membership,
}

impl<'a> SelectorResolver<'a> {
    pub fn new(catalog: &'a Catalog, membership: &'a Membership) -> Self {
        Self { catalog, membership }
    }

    pub fn matches(&self, tenant: &str, selector: &PeerSelector, ip: IpAddr, group: Option<&str>) -> bool {
        match selector {
            PeerSelector::Any => true,
            PeerSelector::Network(network) => self.in_network(tenant, network, ip),
            PeerSelector::GroupInNetwork { group: want, network } => {
                group == Some(want.as_str()) && self.in_network(tenant, network, ip)
            }
            PeerSelector::IpOrCidr(net) => net.contains(ip),
        }
    }

    /// Group name of a flow endpoint: as supplied, else from membership.
    pub fn group_of(&self, tenant: &str, endpoint: &FlowEndpoint) -> Option<String> {
        endpoint
            .group
            .clone()
            .or_else(|| self.membership.lookup(tenant, endpoint.ip).map(|r| r.group))
    }

    fn in_network(&self, tenant: &str, network: &str, ip: IpAddr) -> bool {
        self.catalog
            .network(&NetworkKey::new(tenant, network))
            .is_some_and(|n| n.contains(ip))
    }
}
