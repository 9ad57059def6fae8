//! Policy data model.
//!
//! Caller-facing specs (`*Spec`) deserialize from config/API payloads and are
//! validated into the well-formed values the engine stores: a `Rule` always
//! carries exactly one `PeerSelector` variant, a `Network` always has a parsed
//! subnet with its gateway inside it.

pub mod flow;
pub mod group;
pub mod keys;
pub mod network;
pub mod rule;
pub mod selector;
pub mod verdict;

pub use flow::{FlowDescriptor, FlowEndpoint};
pub use group::{EndpointSpec, GroupSpec};
pub use keys::{GroupKey, NetworkKey, PolicyKey};
pub use network::{Encap, Network, NetworkSpec};
pub use rule::{Action, Direction, Protocol, Rule, RuleSpec};
pub use selector::PeerSelector;
pub use verdict::{Decision, MatchedRule, TieBreak, Verdict};
