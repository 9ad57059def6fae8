//! Rule store: rules keyed by (tenant, policy).
//!
//! Each policy entry also remembers which groups it is attached to, so that a
//! rule mutation can report the groups whose effective rule set changed and a
//! policy delete can be refused while attachments remain.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::{GroupKey, NetworkKey, PolicyKey, Rule};

#[derive(Debug, Default)]
struct PolicyEntry {
    rules: BTreeMap<String, Arc<Rule>>,
    attached: BTreeSet<GroupKey>,
}

#[derive(Default)]
pub struct RuleStore {
    policies: DashMap<PolicyKey, PolicyEntry>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
        }
    }

    pub fn create_policy(&self, key: PolicyKey) -> Result<()> {
        if key.policy.trim().is_empty() {
            return Err(NetSegError::Validation("policy name must not be empty".into()));
        }
        match self.policies.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(o) => {
                Err(NetSegError::DuplicateId(format!("policy {}", o.key())))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(PolicyEntry::default());
                Ok(())
            }
        }
    }

    /// Remove an empty, detached policy.
    pub fn delete_policy(&self, key: &PolicyKey) -> Result<()> {
        if self
            .policies
            .remove_if(key, |_, p| p.attached.is_empty() && p.rules.is_empty())
            .is_some()
        {
            return Ok(());
        }
        match self.policies.get(key) {
            Some(p) => Err(NetSegError::ReferentialIntegrity(format!(
                "policy {key} is attached to {} group(s) and holds {} rule(s)",
                p.attached.len(),
                p.rules.len()
            ))),
            None => Err(NetSegError::NotFound(format!("policy {key}"))),
        }
    }

    pub fn contains(&self, key: &PolicyKey) -> bool {
        self.policies.contains_key(key)
    }

    /// Insert a rule; returns the groups the policy is attached to.
    pub fn add_rule(&self, key: &PolicyKey, rule: Arc<Rule>) -> Result<Vec<GroupKey>> {
        let mut entry = self
            .policies
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("policy {key}")))?;

        match entry.rules.entry(rule.id.clone()) {
            Entry::Occupied(_) => {
                return Err(NetSegError::DuplicateId(format!("rule {} in policy {key}", rule.id)));
            }
            Entry::Vacant(v) => {
                v.insert(rule);
            }
        }
        Ok(entry.attached.iter().cloned().collect())
    }

    /// Remove a rule; returns it with the groups the policy is attached to.
    pub fn remove_rule(&self, key: &PolicyKey, rule_id: &str) -> Result<(Arc<Rule>, Vec<GroupKey>)> {
        let mut entry = self
            .policies
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("policy {key}")))?;
        let rule = entry
            .rules
            .remove(rule_id)
            .ok_or_else(|| NetSegError::NotFound(format!("rule {rule_id} in policy {key}")))?;
        Ok((rule, entry.attached.iter().cloned().collect()))
    }

    /// Point-in-time snapshot ordered by rule id.
    pub fn rules_for_policy(&self, key: &PolicyKey) -> Result<Vec<Arc<Rule>>> {
        self.policies
            .get(key)
            .map(|p| p.rules.values().cloned().collect())
            .ok_or_else(|| NetSegError::NotFound(format!("policy {key}")))
    }

    /// Policy names of a tenant, sorted.
    pub fn policies(&self, tenant: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .policies
            .iter()
            .filter(|e| e.key().tenant == tenant)
            .map(|e| e.key().policy.clone())
            .collect();
        out.sort();
        out
    }

    /// Groups attached to a policy holding a rule whose peer selector names
    /// `network`; their verdicts follow that network's subnet.
    pub fn groups_with_peer_network(&self, network: &NetworkKey) -> Vec<GroupKey> {
        let mut out = BTreeSet::new();
        for entry in self.policies.iter().filter(|e| e.key().tenant == network.tenant) {
            let names_network = entry
                .rules
                .values()
                .any(|r| r.peer.network() == Some(network.network.as_str()));
            if names_network {
                out.extend(entry.attached.iter().cloned());
            }
        }
        out.into_iter().collect()
    }

    /// Record an attachment. Returns false if it was already recorded.
    pub(crate) fn link_group(&self, key: &PolicyKey, group: GroupKey) -> Result<bool> {
        let mut entry = self
            .policies
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("policy {key}")))?;
        Ok(entry.attached.insert(group))
    }

    pub(crate) fn unlink_group(&self, key: &PolicyKey, group: &GroupKey) {
        if let Some(mut entry) = self.policies.get_mut(key) {
            entry.attached.remove(group);
        }
    }
}
