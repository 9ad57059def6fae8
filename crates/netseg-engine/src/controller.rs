//! Lifecycle controller: the engine handle.
//!
//! `Engine` owns the catalog, rule store, policy set and membership index,
//! validates referential integrity on every mutation, and tells the dataplane
//! which endpoint groups need their enforcement state re-derived. Mutations
//! touching several maps run step by step, rolling back earlier steps when a
//! later one fails; no two map guards are ever held together.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::{
    Decision, Direction, EndpointSpec, FlowDescriptor, FlowEndpoint, GroupKey, GroupSpec, Network,
    NetworkKey, NetworkSpec, PeerSelector, PolicyKey, Protocol, Rule, RuleSpec, TieBreak, Verdict,
};

use crate::catalog::{Catalog, RefKind, TenantChild};
use crate::evaluator::{self, VerdictEvaluator};
use crate::notify::{EventKind, Notifier, PolicyEvent};
use crate::obs::EngineMetrics;
use crate::resolver::{EndpointRecord, Membership, SelectorResolver};
use crate::store::{EffectiveRule, PolicySet, RuleStore};

/// A connection attempt between two addresses of one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProbe {
    pub protocol: Protocol,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub port: Option<u16>,
}

/// Both sides' decisions for a connection. A side that is not a registered
/// endpoint has no decision and imposes no restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionVerdict {
    pub verdict: Verdict,
    /// Source group's outbound decision.
    pub egress: Option<Decision>,
    /// Destination group's inbound decision.
    pub ingress: Option<Decision>,
}

/// Peer reference held by a rule.
enum PeerRef {
    None,
    Network(NetworkKey),
    Group(GroupKey),
}

impl PeerRef {
    fn of(tenant: &str, peer: &PeerSelector) -> Self {
        if let Some((network, group)) = peer.group() {
            PeerRef::Group(GroupKey::new(tenant, network, group))
        } else if let Some(network) = peer.network() {
            PeerRef::Network(NetworkKey::new(tenant, network))
        } else {
            PeerRef::None
        }
    }
}

/// Shared engine handle. Clones are cheap and see the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    catalog: Catalog,
    rules: RuleStore,
    groups: PolicySet,
    membership: Membership,
    tie_break: TieBreak,
    notifier: Notifier,
    metrics: EngineMetrics,
}

impl Engine {
    /// Empty engine (only the default tenant) publishing events to `notifier`.
    pub fn new(tie_break: TieBreak, notifier: Notifier) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                catalog: Catalog::new(),
                rules: RuleStore::new(),
                groups: PolicySet::new(),
                membership: Membership::new(),
                tie_break,
                notifier,
                metrics: EngineMetrics::default(),
            }),
        }
    }

    /// Engine with default tie-break and no dataplane listener.
    pub fn standalone() -> Self {
        Self::new(TieBreak::default(), Notifier::disabled())
    }

    pub fn tie_break(&self) -> TieBreak {
        self.inner.tie_break
    }

    /// Live counters; see `render_metrics` for the text exposition.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn render_metrics(&self) -> String {
        self.inner.metrics.render()
    }


    /// `DuplicateId` if the tenant exists.
    pub fn create_tenant(&self, name: &str) -> Result<()> {
        self.record("create_tenant", self.inner.catalog.create_tenant(name))?;
        tracing::info!(tenant = %name, "tenant created");
        Ok(())
    }

    /// Rejected for the default tenant and while networks or policies remain.
    pub fn delete_tenant(&self, name: &str) -> Result<()> {
        self.record("delete_tenant", self.inner.catalog.delete_tenant(name))?;
        tracing::info!(tenant = %name, "tenant deleted");
        Ok(())
    }

    pub fn has_tenant(&self, name: &str) -> bool {
        self.inner.catalog.has_tenant(name)
    }


    /// Validates subnet, gateway and tag range before inserting.
    pub fn create_network(&self, tenant: &str, spec: &NetworkSpec) -> Result<Arc<Network>> {
        let res = Network::from_spec(tenant, spec).and_then(|n| self.inner.catalog.create_network(n));
        let network = self.record("create_network", res)?;
        tracing::info!(
            network = %network.key,
            subnet = %network.subnet,
            encap = network.encap.as_str(),
            pkt_tag = network.pkt_tag,
            "network created"
        );
        Ok(network)
    }

    /// Replace subnet/gateway/tag/encap while no endpoint lives in the network.
    /// Groups whose rules select peers by this network are notified.
    pub fn update_network(&self, tenant: &str, spec: &NetworkSpec) -> Result<Arc<Network>> {
        let res = Network::from_spec(tenant, spec).and_then(|n| self.inner.catalog.update_network(n));
        let (network, refs) = self.record("update_network", res)?;

        let affected = if refs.peers > 0 {
            self.inner.rules.groups_with_peer_network(&network.key)
        } else {
            Vec::new()
        };
        tracing::info!(
            network = %network.key,
            subnet = %network.subnet,
            affected = affected.len(),
            "network updated"
        );
        self.emit(EventKind::NetworkUpdated, affected);
        Ok(network)
    }

    /// Rejected while groups, rule peers or endpoints reference the network.
    pub fn delete_network(&self, tenant: &str, name: &str) -> Result<()> {
        let key = NetworkKey::new(tenant, name);
        self.record("delete_network", self.inner.catalog.delete_network(&key))?;
        tracing::info!(network = %key, "network deleted");
        Ok(())
    }

    pub fn network(&self, tenant: &str, name: &str) -> Result<Arc<Network>> {
        let key = NetworkKey::new(tenant, name);
        self.inner
            .catalog
            .network(&key)
            .ok_or_else(|| NetSegError::NotFound(format!("network {key}")))
    }

    /// Networks of `tenant`, ordered by name.
    pub fn networks(&self, tenant: &str) -> Vec<Arc<Network>> {
        self.inner.catalog.networks(tenant)
    }


    /// Empty policy; rules are added with `add_rule`.
    pub fn create_policy(&self, tenant: &str, name: &str) -> Result<()> {
        let res = self.create_policy_inner(PolicyKey::new(tenant, name));
        self.record("create_policy", res)?;
        tracing::info!(tenant = %tenant, policy = %name, "policy created");
        Ok(())
    }

    fn create_policy_inner(&self, key: PolicyKey) -> Result<()> {
        let tenant = key.tenant.clone();
        self.inner.catalog.retain_tenant(&tenant, TenantChild::Policy)?;
        if let Err(e) = self.inner.rules.create_policy(key) {
            self.inner.catalog.release_tenant(&tenant, TenantChild::Policy);
            return Err(e);
        }
        Ok(())
    }

    /// Rejected while the policy holds rules or is attached to a group.
    pub fn delete_policy(&self, tenant: &str, name: &str) -> Result<()> {
        let key = PolicyKey::new(tenant, name);
        self.record("delete_policy", self.inner.rules.delete_policy(&key))?;
        self.inner.catalog.release_tenant(tenant, TenantChild::Policy);
        tracing::info!(policy = %key, "policy deleted");
        Ok(())
    }

    /// Policy names of `tenant`, sorted.
    pub fn policies(&self, tenant: &str) -> Vec<String> {
        self.inner.rules.policies(tenant)
    }


    /// The rule is visible to every attached group before this returns.
    pub fn add_rule(&self, tenant: &str, policy: &str, spec: &RuleSpec) -> Result<Arc<Rule>> {
        let key = PolicyKey::new(tenant, policy);
        let res = self.add_rule_inner(&key, spec);
        let (rule, groups) = self.record("add_rule", res)?;

        tracing::info!(
            policy = %key,
            rule_id = %rule.id,
            direction = %rule.direction,
            priority = rule.priority,
            action = rule.action.as_str(),
            peer = %rule.peer,
            groups = groups.len(),
            "rule added"
        );
        self.emit(EventKind::RuleAdded, groups);
        Ok(rule)
    }

    fn add_rule_inner(&self, key: &PolicyKey, spec: &RuleSpec) -> Result<(Arc<Rule>, Vec<GroupKey>)> {
        let rule = Arc::new(Rule::from_spec(spec)?);
        if !self.inner.rules.contains(key) {
            return Err(NetSegError::NotFound(format!("policy {key}")));
        }

        let peer = self.retain_peer(&key.tenant, &rule.peer)?;
        match self.inner.rules.add_rule(key, Arc::clone(&rule)) {
            Ok(groups) => Ok((rule, groups)),
            Err(e) => {
                self.release_peer(peer);
                Err(e)
            }
        }
    }

    /// `NotFound` if the policy or rule is absent.
    pub fn remove_rule(&self, tenant: &str, policy: &str, rule_id: &str) -> Result<()> {
        let key = PolicyKey::new(tenant, policy);
        let (rule, groups) = self.record("remove_rule", self.inner.rules.remove_rule(&key, rule_id))?;
        self.release_peer(PeerRef::of(tenant, &rule.peer));

        tracing::info!(policy = %key, rule_id = %rule_id, groups = groups.len(), "rule removed");
        self.emit(EventKind::RuleRemoved, groups);
        Ok(())
    }

    /// Snapshot ordered by rule id.
    pub fn rules_for_policy(&self, tenant: &str, policy: &str) -> Result<Vec<Arc<Rule>>> {
        self.inner.rules.rules_for_policy(&PolicyKey::new(tenant, policy))
    }

    /// Pin the network/group a rule's selector names so it cannot be deleted
    /// while the rule exists.
    fn retain_peer(&self, tenant: &str, peer: &PeerSelector) -> Result<PeerRef> {
        let peer_ref = PeerRef::of(tenant, peer);
        match &peer_ref {
            PeerRef::None => {}
            PeerRef::Network(key) => {
                self.inner
                    .catalog
                    .retain_network(key, RefKind::Peer)
                    .map_err(|_| NetSegError::Validation(format!("peer network {key} does not exist")))?;
            }
            PeerRef::Group(key) => {
                self.inner
                    .groups
                    .retain(key, RefKind::Peer)
                    .map_err(|_| NetSegError::Validation(format!("peer endpoint group {key} does not exist")))?;
            }
        }
        Ok(peer_ref)
    }

    fn release_peer(&self, peer: PeerRef) {
        match peer {
            PeerRef::None => {}
            PeerRef::Network(key) => self.inner.catalog.release_network(&key, RefKind::Peer),
            PeerRef::Group(key) => self.inner.groups.release(&key, RefKind::Peer),
        }
    }


    /// The network and every listed policy must exist.
    pub fn create_group(&self, tenant: &str, spec: &GroupSpec) -> Result<GroupKey> {
        let key = GroupKey::new(tenant, spec.network.as_str(), spec.name.as_str());
        let res = self.create_group_inner(&key, &spec.policies);
        self.record("create_group", res)?;

        tracing::info!(group = %key, policies = ?spec.policies, "endpoint group created");
        self.emit(EventKind::GroupCreated, [key.clone()]);
        Ok(key)
    }

    // Network ref and policy links are taken first and the group is inserted
    // last, already attached; every undo step is a plain release.
    fn create_group_inner(&self, key: &GroupKey, policies: &[String]) -> Result<()> {
        self.check_policies(key, policies)?;

        let network_key = key.network_key();
        self.inner.catalog.retain_network(&network_key, RefKind::Group)?;

        let res = self
            .link_policies(key, policies)
            .and_then(|linked| match self.inner.groups.create_group(key.clone(), policies.to_vec()) {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.unlink_policies(key, &linked);
                    Err(e)
                }
            });
        if res.is_err() {
            self.inner.catalog.release_network(&network_key, RefKind::Group);
        }
        res
    }

    /// Replace the group's attached policies with `spec.policies`.
    pub fn update_group(&self, tenant: &str, spec: &GroupSpec) -> Result<GroupKey> {
        let key = GroupKey::new(tenant, spec.network.as_str(), spec.name.as_str());
        let res = self.update_group_inner(&key, &spec.policies);
        let (detached, attached) = self.record("update_group", res)?;

        tracing::info!(group = %key, policies = ?spec.policies, "endpoint group updated");
        for _ in 0..detached {
            self.emit(EventKind::PolicyDetached, [key.clone()]);
        }
        for _ in 0..attached {
            self.emit(EventKind::PolicyAttached, [key.clone()]);
        }
        Ok(key)
    }

    // Link the wanted policies, swap the attach list in one step, then unlink
    // whatever dropped out. Readers see either the old list or the new one.
    fn update_group_inner(&self, key: &GroupKey, wanted: &[String]) -> Result<(usize, usize)> {
        if !self.inner.groups.contains(key) {
            return Err(NetSegError::NotFound(format!("endpoint group {key}")));
        }
        self.check_policies(key, wanted)?;

        let linked = self.link_policies(key, wanted)?;
        let previous = match self.inner.groups.replace(key, wanted.to_vec()) {
            Ok(previous) => previous,
            Err(e) => {
                self.unlink_policies(key, &linked);
                return Err(e);
            }
        };

        let dropped: Vec<String> = previous.iter().filter(|p| !wanted.contains(p)).cloned().collect();
        self.unlink_policies(key, &dropped);
        let added = wanted.iter().filter(|p| !previous.contains(p)).count();
        Ok((dropped.len(), added))
    }

    /// Link `policies` to the group; on failure nothing stays linked.
    /// Returns the policies this call linked (not those already linked).
    fn link_policies(&self, key: &GroupKey, policies: &[String]) -> Result<Vec<String>> {
        let mut linked = Vec::new();
        for policy in policies {
            match self.inner.rules.link_group(&key.policy_key(policy), key.clone()) {
                Ok(true) => linked.push(policy.clone()),
                Ok(false) => {}
                Err(e) => {
                    self.unlink_policies(key, &linked);
                    return Err(e);
                }
            }
        }
        Ok(linked)
    }

    fn unlink_policies(&self, key: &GroupKey, policies: &[String]) {
        for policy in policies {
            self.inner.rules.unlink_group(&key.policy_key(policy), key);
        }
    }

    /// Rejected while rules name the group as peer or endpoints are registered
    /// in it. Attached policies are detached.
    pub fn delete_group(&self, tenant: &str, network: &str, name: &str) -> Result<()> {
        let key = GroupKey::new(tenant, network, name);
        let policies = self.record("delete_group", self.inner.groups.delete_group(&key))?;
        for policy in &policies {
            self.inner.rules.unlink_group(&key.policy_key(policy), &key);
        }
        self.inner.catalog.release_network(&key.network_key(), RefKind::Group);

        tracing::info!(group = %key, detached = policies.len(), "endpoint group deleted");
        self.emit(EventKind::GroupDeleted, [key]);
        Ok(())
    }

    /// Groups of `tenant`, ordered by key.
    pub fn groups(&self, tenant: &str) -> Vec<GroupKey> {
        self.inner.groups.groups(tenant)
    }

    /// Attach order is preserved.
    pub fn attached_policies(&self, key: &GroupKey) -> Result<Vec<String>> {
        self.inner.groups.attached_policies(key)
    }

    /// `DuplicateId` if already attached.
    pub fn attach_policy(&self, key: &GroupKey, policy: &str) -> Result<()> {
        self.record("attach_policy", self.attach_inner(key, policy))?;
        tracing::info!(group = %key, policy = %policy, "policy attached");
        self.emit(EventKind::PolicyAttached, [key.clone()]);
        Ok(())
    }

    /// `NotFound` if the policy is not attached.
    pub fn detach_policy(&self, key: &GroupKey, policy: &str) -> Result<()> {
        self.record("detach_policy", self.detach_inner(key, policy))?;
        tracing::info!(group = %key, policy = %policy, "policy detached");
        self.emit(EventKind::PolicyDetached, [key.clone()]);
        Ok(())
    }

    // The policy side is linked first: once linked, the policy cannot be
    // deleted underneath the group.
    fn attach_inner(&self, key: &GroupKey, policy: &str) -> Result<()> {
        let policy_key = key.policy_key(policy);
        let linked = self.inner.rules.link_group(&policy_key, key.clone())?;
        if let Err(e) = self.inner.groups.attach(key, policy) {
            if linked {
                self.inner.rules.unlink_group(&policy_key, key);
            }
            return Err(e);
        }
        Ok(())
    }

    fn detach_inner(&self, key: &GroupKey, policy: &str) -> Result<()> {
        self.inner.groups.detach(key, policy)?;
        self.inner.rules.unlink_group(&key.policy_key(policy), key);
        Ok(())
    }

    fn check_policies(&self, key: &GroupKey, policies: &[String]) -> Result<()> {
        for (i, policy) in policies.iter().enumerate() {
            if policies[..i].contains(policy) {
                return Err(NetSegError::Validation(format!(
                    "policy {policy} listed twice for {key}"
                )));
            }
            let policy_key = key.policy_key(policy);
            if !self.inner.rules.contains(&policy_key) {
                return Err(NetSegError::NotFound(format!("policy {policy_key}")));
            }
        }
        Ok(())
    }


    /// The address must lie in the network's subnet and be unused in the tenant.
    pub fn register_endpoint(&self, tenant: &str, spec: &EndpointSpec) -> Result<()> {
        let key = GroupKey::new(tenant, spec.network.as_str(), spec.group.as_str());
        self.record("register_endpoint", self.register_inner(&key, spec.ip))?;
        self.inner.metrics.endpoints.inc(&[("tenant", tenant)]);

        tracing::info!(group = %key, ip = %spec.ip, "endpoint registered");
        self.emit(EventKind::EndpointAdded, [key]);
        Ok(())
    }

    fn register_inner(&self, key: &GroupKey, ip: IpAddr) -> Result<()> {
        self.inner.groups.retain(key, RefKind::Endpoint)?;
        let network_key = key.network_key();
        let network = match self.inner.catalog.retain_network(&network_key, RefKind::Endpoint) {
            Ok(n) => n,
            Err(e) => {
                self.inner.groups.release(key, RefKind::Endpoint);
                return Err(e);
            }
        };

        let record = EndpointRecord {
            network: key.network.clone(),
            group: key.group.clone(),
        };
        let res = if network.contains(ip) {
            self.inner.membership.insert(&key.tenant, ip, record)
        } else {
            Err(NetSegError::Validation(format!(
                "endpoint {ip} is outside subnet {} of network {network_key}",
                network.subnet
            )))
        };
        if res.is_err() {
            self.inner.catalog.release_network(&network_key, RefKind::Endpoint);
            self.inner.groups.release(key, RefKind::Endpoint);
        }
        res
    }

    /// `NotFound` if nothing is registered at `ip`.
    pub fn unregister_endpoint(&self, tenant: &str, ip: IpAddr) -> Result<()> {
        let record = self.record("unregister_endpoint", self.inner.membership.remove(tenant, ip))?;
        let key = GroupKey::new(tenant, record.network, record.group);
        self.inner.catalog.release_network(&key.network_key(), RefKind::Endpoint);
        self.inner.groups.release(&key, RefKind::Endpoint);
        self.inner.metrics.endpoints.dec(&[("tenant", tenant)]);

        tracing::info!(group = %key, ip = %ip, "endpoint unregistered");
        self.emit(EventKind::EndpointRemoved, [key]);
        Ok(())
    }

    /// Where `ip` is registered, if anywhere.
    pub fn endpoint(&self, tenant: &str, ip: IpAddr) -> Option<EndpointRecord> {
        self.inner.membership.lookup(tenant, ip)
    }


    /// Rules of all attached policies, each tagged with its policy.
    pub fn effective_rules(&self, key: &GroupKey) -> Result<Vec<EffectiveRule>> {
        self.inner.groups.effective_rules(key, &self.inner.rules)
    }

    /// Effective rules in evaluation order, for first-match programming.
    pub fn compiled_rules(&self, key: &GroupKey) -> Result<Vec<EffectiveRule>> {
        Ok(evaluator::compile(self.effective_rules(key)?, self.inner.tie_break))
    }

    /// Whether a remote endpoint is selected by `selector` right now.
    pub fn selector_matches(&self, tenant: &str, selector: &PeerSelector, ip: IpAddr, group: Option<&str>) -> bool {
        self.resolver().matches(tenant, selector, ip, group)
    }

    /// Verdict for `flow` from the point of view of group `key`.
    pub fn verdict(&self, key: &GroupKey, flow: &FlowDescriptor) -> Result<Decision> {
        let started = Instant::now();
        let rules = self.effective_rules(key)?;
        let decision = VerdictEvaluator::new(self.resolver(), self.inner.tie_break).evaluate(&key.tenant, &rules, flow);

        let source = if decision.matched.is_some() { "rule" } else { "open" };
        self.inner
            .metrics
            .verdicts
            .inc(&[("verdict", decision.verdict.as_str()), ("source", source)]);
        self.inner
            .metrics
            .evaluation_duration
            .observe(&[("direction", flow.direction.as_str())], started.elapsed());

        tracing::debug!(
            group = %key,
            direction = %flow.direction,
            protocol = %flow.protocol,
            src = %flow.src.ip,
            dst = %flow.dst.ip,
            port = ?flow.port,
            verdict = %decision.verdict,
            rule = ?decision.matched.as_ref().map(|m| (&m.policy, &m.rule_id)),
            "verdict"
        );
        Ok(decision)
    }

    /// Evaluate a connection end to end: the source group's `out` rules and
    /// the destination group's `in` rules must both allow it.
    pub fn check_connection(&self, tenant: &str, probe: &ConnectionProbe) -> Result<ConnectionVerdict> {
        if !self.inner.catalog.has_tenant(tenant) {
            return Err(NetSegError::NotFound(format!("tenant {tenant}")));
        }
        let src_rec = self.inner.membership.lookup(tenant, probe.src);
        let dst_rec = self.inner.membership.lookup(tenant, probe.dst);
        let src = FlowEndpoint {
            ip: probe.src,
            group: src_rec.as_ref().map(|r| r.group.clone()),
        };
        let dst = FlowEndpoint {
            ip: probe.dst,
            group: dst_rec.as_ref().map(|r| r.group.clone()),
        };

        let egress = match &src_rec {
            Some(rec) => {
                let key = GroupKey::new(tenant, rec.network.as_str(), rec.group.as_str());
                let flow = FlowDescriptor::new(Direction::Out, probe.protocol, src.clone(), dst.clone(), probe.port);
                Some(self.verdict(&key, &flow)?)
            }
            None => None,
        };
        let ingress = match &dst_rec {
            Some(rec) => {
                let key = GroupKey::new(tenant, rec.network.as_str(), rec.group.as_str());
                let flow = FlowDescriptor::new(Direction::In, probe.protocol, src, dst, probe.port);
                Some(self.verdict(&key, &flow)?)
            }
            None => None,
        };

        let allowed = [&egress, &ingress]
            .iter()
            .all(|d| d.as_ref().map_or(true, |d| d.verdict.is_allowed()));
        Ok(ConnectionVerdict {
            verdict: if allowed { Verdict::Allow } else { Verdict::Deny },
            egress,
            ingress,
        })
    }


    fn resolver(&self) -> SelectorResolver<'_> {
        SelectorResolver::new(&self.inner.catalog, &self.inner.membership)
    }

    fn record<T>(&self, op: &'static str, res: Result<T>) -> Result<T> {
        let result = match &res {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        self.inner.metrics.mutations.inc(&[("op", op), ("result", result)]);
        if let Err(e) = &res {
            tracing::debug!(op, error = %e, "mutation rejected");
        }
        res
    }

    fn emit(&self, kind: EventKind, groups: impl IntoIterator<Item = GroupKey>) {
        for group in groups {
            let outcome = match self.inner.notifier.notify(PolicyEvent { kind, group: group.clone() }) {
                Ok(()) => "sent",
                Err(e) => {
                    tracing::warn!(group = %group, kind = kind.as_str(), error = %e, "dataplane notification dropped");
                    e.label()
                }
            };
            self.inner.metrics.notifications.inc(&[("outcome", outcome)]);
        }
    }
}
