//! Verdict evaluation.
//!
//! From the local group's point of view a flow is filtered against the
//! group's effective rules by direction, protocol and port, then by peer
//! selector against the remote side. No surviving rule means the flow is
//! unrestricted. Otherwise the highest priority wins; ties go to the action
//! preferred by the configured `TieBreak`, then to the lowest
//! (policy, rule id) so the outcome is deterministic.

use std::cmp::Ordering;

use netseg_core::model::{Decision, FlowDescriptor, TieBreak};

use crate::resolver::SelectorResolver;
use crate::store::EffectiveRule;

/// Total precedence order: `Less` means `a` beats `b`.
pub fn precedence(tie_break: TieBreak, a: &EffectiveRule, b: &EffectiveRule) -> Ordering {
    let rank = |r: &EffectiveRule| u8::from(r.rule.action != tie_break.preferred());

    b.rule
        .priority
        .cmp(&a.rule.priority)
        .then_with(|| rank(a).cmp(&rank(b)))
        .then_with(|| a.policy.cmp(&b.policy))
        .then_with(|| a.rule.id.cmp(&b.rule.id))
}

/// Effective rules in precedence order; first match on this list gives the
/// same decision as `VerdictEvaluator::evaluate`.
pub fn compile(mut rules: Vec<EffectiveRule>, tie_break: TieBreak) -> Vec<EffectiveRule> {
    rules.sort_by(|a, b| precedence(tie_break, a, b));
    rules
}

pub struct VerdictEvaluator<'a> {
    resolver: SelectorResolver<'a>,
    tie_break: TieBreak,
}

impl<'a> VerdictEvaluator<'a> {
    pub fn new(resolver: SelectorResolver<'a>, tie_break: TieBreak) -> Self {
        Self { resolver, tie_break }
    }

    pub fn evaluate(&self, tenant: &str, rules: &[EffectiveRule], flow: &FlowDescriptor) -> Decision {
        let remote = flow.remote();
        let remote_group = self.resolver.group_of(tenant, remote);

        let winner = rules
            .iter()
            .filter(|r| r.rule.applies_to(flow.direction, flow.protocol, flow.port))
            .filter(|r| {
                self.resolver
                    .matches(tenant, &r.rule.peer, remote.ip, remote_group.as_deref())
            })
            .min_by(|a, b| precedence(self.tie_break, a, b));

        match winner {
            Some(r) => Decision::from_rule(r.matched()),
            None => Decision::open(),
        }
    }
}
