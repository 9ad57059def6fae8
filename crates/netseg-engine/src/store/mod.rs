//! Policy state: rules per policy and policies per endpoint group.

pub mod policy_set;
pub mod rules;

use std::sync::Arc;

use netseg_core::model::{MatchedRule, Rule};

pub use policy_set::PolicySet;
pub use rules::RuleStore;

/// A rule as seen by a group, tagged with the policy it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRule {
    pub policy: String,
    pub rule: Arc<Rule>,
}

impl EffectiveRule {
    pub fn matched(&self) -> MatchedRule {
        MatchedRule {
            policy: self.policy.clone(),
            rule_id: self.rule.id.clone(),
            priority: self.rule.priority,
            action: self.rule.action,
        }
    }
}
