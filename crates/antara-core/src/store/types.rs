use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args_json: String,
    pub result_json: Option<String>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub turn_number: u32,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub agent_id: Option<String>,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub project_path_hash: String,
    pub title: Option<String>,
    pub agent_id: String,
    pub model_id: String,
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub tags: Vec<String>,
    pub branch: Option<String>,
    pub turn_count: u32,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub meta: SessionMeta,
    pub turns: Vec<Turn>,
}

/// Union of addressable memory scopes (spec §3.3). Each scope resolves to a
/// single file under `<home>/memory/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryScope {
    Global,
    Project(String),
    Agent(String),
    Session(String),
}

impl MemoryScope {
    pub fn file_stem(&self) -> String {
        match self {
            MemoryScope::Global => "global".to_string(),
            MemoryScope::Project(hash) => format!("project-{hash}"),
            MemoryScope::Agent(agent) => format!("agent-{agent}"),
            MemoryScope::Session(id) => format!("session-{id}"),
        }
    }
}

/// Persisted Nidra singleton row (spec §3.4 / §6.5). Times are stored as
/// RFC3339 strings in SQLite but handled as `DateTime<Utc>` everywhere else.
#[derive(Debug, Clone)]
pub struct NidraRow {
    pub current_state: String,
    pub last_state_change: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_consolidation_start: Option<DateTime<Utc>>,
    pub last_consolidation_end: Option<DateTime<Utc>>,
    pub consolidation_phase: Option<String>,
    pub consolidation_progress: f64,
}

/// Persisted approval-request event row (spec §3.8 / §6.6).
#[derive(Debug, Clone)]
pub struct ApprovalEventRow {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub action: String,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_reason: Option<String>,
}
