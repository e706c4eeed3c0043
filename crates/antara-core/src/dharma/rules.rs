//! Policy rules and verdict aggregation (spec §4.5.1). Rules are pure
//! functions over `(PolicyAction, PolicyContext)`: no I/O, no clock reads
//! beyond `context.timestamp`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    ToolCall,
    FileRead,
    FileWrite,
    FileDelete,
    ShellExec,
    NetworkRequest,
    LlmCall,
    AgentSpawn,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyAction {
    pub kind: Option<ActionKind>,
    pub tool_name: Option<String>,
    pub args: HashMap<String, String>,
    pub file_path: Option<String>,
    pub command: Option<String>,
    pub url: Option<String>,
    pub cost: Option<f64>,
    pub content: Option<String>,
}

impl PolicyAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub session_id: String,
    pub agent_id: String,
    pub agent_depth: u32,
    pub project_path: String,
    pub total_cost_so_far: f64,
    pub cost_budget: Option<f64>,
    pub files_modified: Vec<String>,
    pub commands_run: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl PolicyContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            agent_depth: 0,
            project_path: String::new(),
            total_cost_so_far: 0.0,
            cost_budget: None,
            files_modified: Vec::new(),
            commands_run: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Whether `agent_id` marks a quarantined execution context (spec
    /// §4.5.3): either prefixed `quarantine:` or carrying `args.quarantine`.
    pub fn is_quarantined(&self, action: &PolicyAction) -> bool {
        self.agent_id.starts_with("quarantine:")
            || action.args.get("quarantine").map(|v| v == "true").unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerdictStatus {
    Allow,
    Warn,
    Modify,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub status: VerdictStatus,
    pub rule_id: String,
    pub reason: String,
    pub modified_action: Option<PolicyAction>,
    pub suggestion: Option<String>,
}

impl PolicyVerdict {
    pub fn allow(rule_id: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Allow,
            rule_id: rule_id.into(),
            reason: String::new(),
            modified_action: None,
            suggestion: None,
        }
    }

    pub fn deny(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Deny,
            rule_id: rule_id.into(),
            reason: reason.into(),
            modified_action: None,
            suggestion: None,
        }
    }

    pub fn warn(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Warn,
            rule_id: rule_id.into(),
            reason: reason.into(),
            modified_action: None,
            suggestion: None,
        }
    }

    pub fn modify(rule_id: impl Into<String>, reason: impl Into<String>, modified: PolicyAction) -> Self {
        Self {
            status: VerdictStatus::Modify,
            rule_id: rule_id.into(),
            reason: reason.into(),
            modified_action: Some(modified),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

pub type RuleFn = dyn Fn(&PolicyAction, &PolicyContext) -> PolicyVerdict + Send + Sync;

pub struct PolicyRule {
    pub id: String,
    pub category: &'static str,
    evaluate: Box<RuleFn>,
}

impl PolicyRule {
    pub fn new(
        id: impl Into<String>,
        category: &'static str,
        evaluate: impl Fn(&PolicyAction, &PolicyContext) -> PolicyVerdict + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            evaluate: Box::new(evaluate),
        }
    }

    pub fn run(&self, action: &PolicyAction, context: &PolicyContext) -> PolicyVerdict {
        (self.evaluate)(action, context)
    }
}

pub struct PolicySet {
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

impl PolicySet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Aggregates per-rule verdicts: `deny` beats `modify` beats `warn` beats
/// `allow`; `modify` compositions apply in rule order so later rules see
/// earlier modifications; `warn` reasons are joined.
pub fn aggregate(verdicts: &[PolicyVerdict]) -> PolicyVerdict {
    if let Some(deny) = verdicts.iter().find(|v| v.status == VerdictStatus::Deny) {
        return deny.clone();
    }
    let modifies: Vec<&PolicyVerdict> = verdicts.iter().filter(|v| v.status == VerdictStatus::Modify).collect();
    if !modifies.is_empty() {
        let reason = modifies.iter().map(|v| v.reason.as_str()).collect::<Vec<_>>().join("; ");
        let modified_action = modifies.last().and_then(|v| v.modified_action.clone());
        return PolicyVerdict {
            status: VerdictStatus::Modify,
            rule_id: modifies.last().map(|v| v.rule_id.clone()).unwrap_or_default(),
            reason,
            modified_action,
            suggestion: None,
        };
    }
    let warnings: Vec<&PolicyVerdict> = verdicts.iter().filter(|v| v.status == VerdictStatus::Warn).collect();
    if !warnings.is_empty() {
        let reason = warnings.iter().map(|v| v.reason.as_str()).collect::<Vec<_>>().join("; ");
        return PolicyVerdict {
            status: VerdictStatus::Warn,
            rule_id: warnings.last().map(|v| v.rule_id.clone()).unwrap_or_default(),
            reason,
            modified_action: None,
            suggestion: None,
        };
    }
    PolicyVerdict::allow("allow")
}

pub struct PolicyEngine {
    sets: Vec<PolicySet>,
    permissive_on_error: bool,
}

impl PolicyEngine {
    pub fn new(permissive_on_error: bool) -> Self {
        Self {
            sets: Vec::new(),
            permissive_on_error,
        }
    }

    pub fn with_set(mut self, set: PolicySet) -> Self {
        self.sets.push(set);
        self
    }

    pub fn evaluate(&self, action: &PolicyAction, context: &PolicyContext) -> PolicyVerdict {
        let verdicts: Vec<PolicyVerdict> = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sets
                .iter()
                .flat_map(|set| set.rules.iter())
                .map(|rule| rule.run(action, context))
                .collect()
        }))
        .unwrap_or_else(|_| {
            vec![if self.permissive_on_error {
                PolicyVerdict::allow("policy-error-fallback")
            } else {
                PolicyVerdict::deny("policy-error-fallback", "a rule panicked during evaluation")
            }]
        });
        aggregate(&verdicts)
    }
}

/// Builds the three canonical skill-security rules (spec §4.5.3).
pub fn skill_security_set() -> PolicySet {
    PolicySet::new("skill-security")
        .with_rule(PolicyRule::new(
            "skill-requires-review",
            "security",
            |action, _ctx| {
                if action.tool_name.as_deref() != Some("skill_register") {
                    return PolicyVerdict::allow("skill-requires-review");
                }
                let approved = action.args.get("approved").map(|v| v == "true").unwrap_or(false);
                let source = action.args.get("source").map(String::as_str).unwrap_or("");
                if approved || matches!(source, "tool" | "mcp-server" | "plugin") {
                    PolicyVerdict::allow("skill-requires-review")
                } else {
                    PolicyVerdict::deny(
                        "skill-requires-review",
                        "external skill registration requires explicit approval",
                    )
                }
            },
        ))
        .with_rule(PolicyRule::new(
            "skill-network-isolation",
            "network",
            |action, ctx| {
                if !ctx.is_quarantined(action) {
                    return PolicyVerdict::allow("skill-network-isolation");
                }
                let is_network = action.kind == Some(ActionKind::NetworkRequest)
                    || action
                        .tool_name
                        .as_deref()
                        .map(|t| t.contains("fetch") || t.contains("http") || t.contains("curl"))
                        .unwrap_or(false);
                if is_network {
                    PolicyVerdict::deny("skill-network-isolation", "network access is blocked in quarantine")
                } else {
                    PolicyVerdict::allow("skill-network-isolation")
                }
            },
        ))
        .with_rule(PolicyRule::new("skill-file-sandbox", "filesystem", |action, ctx| {
            if !ctx.is_quarantined(action) {
                return PolicyVerdict::allow("skill-file-sandbox");
            }
            let is_file_op = matches!(
                action.kind,
                Some(ActionKind::FileRead) | Some(ActionKind::FileWrite) | Some(ActionKind::FileDelete)
            );
            if !is_file_op {
                return PolicyVerdict::allow("skill-file-sandbox");
            }
            match &action.file_path {
                Some(path) if path.contains("skills/staging/") => PolicyVerdict::allow("skill-file-sandbox"),
                _ => PolicyVerdict::deny(
                    "skill-file-sandbox",
                    "quarantined file operations are confined to skills/staging/",
                ),
            }
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_beats_modify_beats_warn_beats_allow() {
        let verdicts = vec![
            PolicyVerdict::allow("r1"),
            PolicyVerdict::warn("r2", "careful"),
            PolicyVerdict::modify("r3", "trimmed", PolicyAction::default()),
            PolicyVerdict::deny("r4", "blocked"),
        ];
        let final_verdict = aggregate(&verdicts);
        assert_eq!(final_verdict.status, VerdictStatus::Deny);
        assert_eq!(final_verdict.rule_id, "r4");
    }

    #[test]
    fn unapproved_external_skill_registration_is_denied() {
        let engine = PolicyEngine::new(false).with_set(skill_security_set());
        let action = PolicyAction::new(ActionKind::ToolCall)
            .with_tool_name("skill_register")
            .with_arg("source", "web");
        let context = PolicyContext::new("agent-1", "session-1");
        let verdict = engine.evaluate(&action, &context);
        assert_eq!(verdict.status, VerdictStatus::Deny);
        assert_eq!(verdict.rule_id, "skill-requires-review");
    }

    #[test]
    fn approved_skill_registration_is_allowed() {
        let engine = PolicyEngine::new(false).with_set(skill_security_set());
        let action = PolicyAction::new(ActionKind::ToolCall)
            .with_tool_name("skill_register")
            .with_arg("approved", "true");
        let context = PolicyContext::new("agent-1", "session-1");
        let verdict = engine.evaluate(&action, &context);
        assert_eq!(verdict.status, VerdictStatus::Allow);
    }

    #[test]
    fn quarantined_network_request_is_denied() {
        let engine = PolicyEngine::new(false).with_set(skill_security_set());
        let action = PolicyAction::new(ActionKind::NetworkRequest);
        let context = PolicyContext::new("quarantine:agent-1", "session-1");
        let verdict = engine.evaluate(&action, &context);
        assert_eq!(verdict.status, VerdictStatus::Deny);
        assert_eq!(verdict.rule_id, "skill-network-isolation");
    }

    #[test]
    fn quarantined_file_write_outside_staging_is_denied() {
        let engine = PolicyEngine::new(false).with_set(skill_security_set());
        let action = PolicyAction::new(ActionKind::FileWrite).with_file_path("/etc/passwd");
        let context = PolicyContext::new("quarantine:agent-1", "session-1");
        let verdict = engine.evaluate(&action, &context);
        assert_eq!(verdict.status, VerdictStatus::Deny);
        assert_eq!(verdict.rule_id, "skill-file-sandbox");
    }

    #[test]
    fn quarantined_file_write_inside_staging_is_allowed() {
        let engine = PolicyEngine::new(false).with_set(skill_security_set());
        let action = PolicyAction::new(ActionKind::FileWrite).with_file_path("/home/skills/staging/foo.txt");
        let context = PolicyContext::new("quarantine:agent-1", "session-1");
        let verdict = engine.evaluate(&action, &context);
        assert_eq!(verdict.status, VerdictStatus::Allow);
    }
}
