//! Policy set: the ordered list of policies bound to each endpoint group.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use netseg_core::error::{NetSegError, Result};
use netseg_core::model::GroupKey;

use super::{EffectiveRule, RuleStore};
use crate::catalog::{RefCounts, RefKind};

#[derive(Debug, Default)]
struct GroupEntry {
    policies: Vec<String>,
    refs: RefCounts,
}

#[derive(Default)]
pub struct PolicySet {
    groups: DashMap<GroupKey, GroupEntry>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Insert a group together with its initial attach list, so readers never
    /// see it half attached.
    pub fn create_group(&self, key: GroupKey, policies: Vec<String>) -> Result<()> {
        if key.group.trim().is_empty() {
            return Err(NetSegError::Validation("endpoint group name must not be empty".into()));
        }
        match self.groups.entry(key) {
            Entry::Occupied(o) => Err(NetSegError::DuplicateId(format!("endpoint group {}", o.key()))),
            Entry::Vacant(v) => {
                v.insert(GroupEntry {
                    policies,
                    refs: RefCounts::default(),
                });
                Ok(())
            }
        }
    }

    /// Remove a group nothing points at; returns the policies it had attached.
    pub fn delete_group(&self, key: &GroupKey) -> Result<Vec<String>> {
        if let Some((_, entry)) = self
            .groups
            .remove_if(key, |_, g| g.refs.peers == 0 && g.refs.endpoints == 0)
        {
            return Ok(entry.policies);
        }
        match self.groups.get(key) {
            Some(g) => Err(NetSegError::ReferentialIntegrity(format!(
                "endpoint group {key} is referenced by {}",
                g.refs.describe()
            ))),
            None => Err(NetSegError::NotFound(format!("endpoint group {key}"))),
        }
    }

    pub fn contains(&self, key: &GroupKey) -> bool {
        self.groups.contains_key(key)
    }

    pub fn attach(&self, key: &GroupKey, policy: &str) -> Result<()> {
        let mut entry = self
            .groups
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint group {key}")))?;
        if entry.policies.iter().any(|p| p == policy) {
            return Err(NetSegError::DuplicateId(format!(
                "policy {policy} already attached to {key}"
            )));
        }
        entry.policies.push(policy.to_string());
        Ok(())
    }

    pub fn detach(&self, key: &GroupKey, policy: &str) -> Result<()> {
        let mut entry = self
            .groups
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint group {key}")))?;
        let pos = entry
            .policies
            .iter()
            .position(|p| p == policy)
            .ok_or_else(|| NetSegError::NotFound(format!("policy {policy} is not attached to {key}")))?;
        entry.policies.remove(pos);
        Ok(())
    }

    /// Swap the whole attach list; returns the previous one.
    pub fn replace(&self, key: &GroupKey, policies: Vec<String>) -> Result<Vec<String>> {
        let mut entry = self
            .groups
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint group {key}")))?;
        Ok(std::mem::replace(&mut entry.policies, policies))
    }

    pub fn attached_policies(&self, key: &GroupKey) -> Result<Vec<String>> {
        self.groups
            .get(key)
            .map(|g| g.policies.clone())
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint group {key}")))
    }

    /// Union of the attached policies' rules, each tagged with its policy.
    ///
    /// The attach list is snapshotted first and the guard released before the
    /// rule store is read; no two map guards are held at once.
    pub fn effective_rules(&self, key: &GroupKey, store: &RuleStore) -> Result<Vec<EffectiveRule>> {
        let policies = self.attached_policies(key)?;

        let mut out = Vec::new();
        for policy in policies {
            // A policy detached concurrently simply contributes nothing.
            let Ok(rules) = store.rules_for_policy(&key.policy_key(&policy)) else {
                continue;
            };
            out.extend(rules.into_iter().map(|rule| EffectiveRule {
                policy: policy.clone(),
                rule,
            }));
        }
        Ok(out)
    }

    /// Groups of a tenant, ordered.
    pub fn groups(&self, tenant: &str) -> Vec<GroupKey> {
        let mut out: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|e| e.key().tenant == tenant)
            .map(|e| e.key().clone())
            .collect();
        out.sort();
        out
    }

    pub(crate) fn retain(&self, key: &GroupKey, kind: RefKind) -> Result<()> {
        let mut entry = self
            .groups
            .get_mut(key)
            .ok_or_else(|| NetSegError::NotFound(format!("endpoint group {key}")))?;
        entry.refs.retain(kind);
        Ok(())
    }

    pub(crate) fn release(&self, key: &GroupKey, kind: RefKind) {
        if let Some(mut entry) = self.groups.get_mut(key) {
            entry.refs.release(kind);
        }
    }
}
