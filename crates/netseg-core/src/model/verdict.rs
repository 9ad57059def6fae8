//! Verdicts and the decision record explaining them.

use std::fmt;

use serde::Deserialize;

use super::rule::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
        }
    }

    pub fn is_allowed(self) -> bool {
        self == Verdict::Allow
    }
}

impl From<Action> for Verdict {
    fn from(a: Action) -> Self {
        match a {
            Action::Allow => Verdict::Allow,
            Action::Deny => Verdict::Deny,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which action wins when matching rules share the top priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    DenyWins,
    AllowWins,
}

impl TieBreak {
    /// Action preferred on a priority tie.
    pub fn preferred(self) -> Action {
        match self {
            TieBreak::DenyWins => Action::Deny,
            TieBreak::AllowWins => Action::Allow,
        }
    }
}

/// The rule that decided a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    pub policy: String,
    pub rule_id: String,
    pub priority: u32,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// `None` when no rule applied (open by default).
    pub matched: Option<MatchedRule>,
}

impl Decision {
    /// No applicable rule.
    pub fn open() -> Self {
        Self {
            verdict: Verdict::Allow,
            matched: None,
        }
    }

    pub fn from_rule(rule: MatchedRule) -> Self {
        Self {
            verdict: rule.action.into(),
            matched: Some(rule),
        }
    }
}
