//! Dharma: policy evaluation and human-in-the-loop approval (spec §4.5).

mod approval;
mod rules;

pub use approval::{
    ApprovalError, ApprovalEvent, ApprovalGate, ApprovalRequest, ApprovalRequestParams, ApprovalStatus,
};
pub use rules::{
    aggregate, skill_security_set, ActionKind, PolicyAction, PolicyContext, PolicyEngine, PolicyRule, PolicySet,
    PolicyVerdict, RuleFn, VerdictStatus,
};
