//! Memory-Bridge: the single orchestrator wiring the session store,
//! recall engine, and explicit-memory grammar together per agent session
//! (spec §4.9, Component J).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::recall::RecallEngine;
use crate::store::{Role, Session, SessionMeta, SessionStore, StorageError, ToolCall, Turn};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Signal streams mentioned in spec §4.9/§6.1; `Flow` is ephemeral and
/// excluded from the persisted-stream set but still addressable for
/// context assembly.
const PERSISTED_STREAMS: &[&str] = &["identity", "projects", "tasks"];
const STREAM_SNAPSHOT_CHAR_LIMIT: usize = 2000;

/// Half-life, in days, for the confidence component of explicit-memory
/// recall ranking. Chosen to roughly match the recall engine's week-scale
/// recency boost (`recall::recency`) without coupling the two constants.
const EXPLICIT_MEMORY_HALF_LIFE_DAYS: f64 = 14.0;

const MEMORY_CAPABILITIES_BLOCK: &str = "\
## Memory Capabilities
You can steer what is remembered across sessions:
- \"remember <fact>\" stores an explicit memory.
- \"forget <text>\" removes explicit memories matching that text.
- \"recall <query>\" surfaces the most relevant explicit memories.
- \"list [category]\" shows recent explicit memories, optionally filtered by category.";

struct SessionHandle {
    meta: SessionMeta,
    project_path: String,
}

/// Wires the session store (§4.1), recall engine (§4.2), and explicit
/// memory grammar together. Holds an in-memory table of active sessions
/// so per-turn calls don't need to re-resolve `project_path` from disk.
pub struct MemoryBridge {
    session_store: Arc<SessionStore>,
    recall: Arc<RecallEngine>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl MemoryBridge {
    pub fn new(session_store: Arc<SessionStore>, recall: Arc<RecallEngine>) -> Self {
        Self { session_store, recall, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn init_session(
        &self,
        agent_id: &str,
        profile: Option<&str>,
        model_id: &str,
        project_path: &str,
    ) -> Result<String> {
        let meta = self.session_store.create_session(project_path, agent_id, model_id, None, profile)?;
        let id = meta.id.clone();
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(id.clone(), SessionHandle { meta, project_path: project_path.to_string() });
        Ok(id)
    }

    /// Spins up a sub-session carrying `parent_id`, for agent delegation
    /// (spec §4.9). The sub-session's findings are bubbled back up via
    /// [`Self::bubble_up_findings`] once it completes.
    pub fn create_sub_session(
        &self,
        parent_id: &str,
        purpose: &str,
        agent_id: &str,
        model_id: &str,
        project_path: &str,
    ) -> Result<String> {
        let meta = self.session_store.create_session(project_path, agent_id, model_id, Some(parent_id), Some(purpose))?;
        let id = meta.id.clone();
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(id.clone(), SessionHandle { meta, project_path: project_path.to_string() });
        Ok(id)
    }

    fn with_handle<F>(&self, session_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionHandle, &SessionStore) -> Result<()>,
    {
        let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
        let handle = sessions.get_mut(session_id).ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        f(handle, &self.session_store)
    }

    pub fn record_user_turn(&self, session_id: &str, text: &str) -> Result<()> {
        self.with_handle(session_id, |handle, store| {
            let turn = Turn {
                session_id: handle.meta.id.clone(),
                turn_number: handle.meta.turn_count + 1,
                role: Role::User,
                content: text.to_string(),
                tool_calls: Vec::new(),
                agent_id: None,
                model_id: None,
                created_at: Utc::now(),
            };
            store.add_turn(&mut handle.meta, turn)?;
            Ok(())
        })
    }

    /// Appends the assistant turn, then fires off best-effort background
    /// indexing into the recall engine. Indexing errors are logged and
    /// never surfaced to the caller (spec §4.9, §3.11 "best effort
    /// everywhere").
    pub fn record_assistant_turn(&self, session_id: &str, text: &str, tool_calls: Vec<ToolCall>) -> Result<()> {
        self.with_handle(session_id, |handle, store| {
            let turn = Turn {
                session_id: handle.meta.id.clone(),
                turn_number: handle.meta.turn_count + 1,
                role: Role::Assistant,
                content: text.to_string(),
                tool_calls,
                agent_id: Some(handle.meta.agent_id.clone()),
                model_id: Some(handle.meta.model_id.clone()),
                created_at: Utc::now(),
            };
            store.add_turn(&mut handle.meta, turn)?;
            Ok(())
        })?;

        let recall = self.recall.clone();
        let session_store = self.session_store.clone();
        let source_id = session_id.to_string();
        let content = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = recall.index_text(session_store.storage(), "turn", &source_id, &content) {
                tracing::warn!(error = %e, session_id = %source_id, "background turn indexing failed");
            }
        });
        Ok(())
    }

    pub fn session(&self, session_id: &str) -> Result<Session> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        let handle = sessions.get(session_id).ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        Ok(self.session_store.load_session(&handle.project_path, session_id)?)
    }

    /// Appends the sub-session's summarized findings to the parent
    /// session as a system turn, then drops the sub-session handle.
    pub fn bubble_up_findings(&self, parent_id: &str, sub_session_id: &str, findings: &str) -> Result<()> {
        self.with_handle(parent_id, |handle, store| {
            let turn = Turn {
                session_id: handle.meta.id.clone(),
                turn_number: handle.meta.turn_count + 1,
                role: Role::System,
                content: format!("[sub-session {sub_session_id} findings]\n{findings}"),
                tool_calls: Vec::new(),
                agent_id: None,
                model_id: None,
                created_at: Utc::now(),
            };
            store.add_turn(&mut handle.meta, turn)?;
            Ok(())
        })?;
        self.sessions.lock().expect("sessions mutex poisoned").remove(sub_session_id);
        Ok(())
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Err(_) => None,
        }
    }

    fn read_identity_files(&self) -> Vec<String> {
        let dir = self.session_store.home().join("identity");
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        paths.sort();
        paths.into_iter().filter_map(|p| Self::read_trimmed(&p)).collect()
    }

    fn read_memory_scope(&self, stem: &str) -> Option<String> {
        let path = self.session_store.home().join("memory").join(format!("{stem}.md"));
        Self::read_trimmed(&path)
    }

    fn read_stream_snapshot(&self, stream: &str, char_limit: Option<usize>) -> Option<String> {
        let path = self.session_store.home().join("streams").join(format!("{stream}.md"));
        let content = Self::read_trimmed(&path)?;
        match char_limit {
            Some(limit) if content.len() > limit => {
                let truncated: String = content.chars().rev().take(limit).collect();
                Some(truncated.chars().rev().collect())
            }
            _ => Some(content),
        }
    }

    fn decayed_confidence(age_days: f64) -> f64 {
        0.5_f64.powf(age_days.max(0.0) / EXPLICIT_MEMORY_HALF_LIFE_DAYS)
    }

    /// Lists explicit memories with temporal decay applied, most relevant
    /// first, rendered as a flat bullet list.
    fn explicit_memory_section(&self) -> Option<String> {
        let rows = self.session_store.storage().list_explicit_memories(None, 200).ok()?;
        if rows.is_empty() {
            return None;
        }
        let now = Utc::now();
        let mut scored: Vec<(f64, String)> = rows
            .into_iter()
            .map(|(_, category, content, created_at)| {
                let age_days = (now - created_at).num_milliseconds() as f64 / 86_400_000.0;
                let score = Self::decayed_confidence(age_days);
                (score, format!("- [{category}] {content}"))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let lines: Vec<String> = scored.into_iter().map(|(_, line)| line).collect();
        Some(format!("## Explicit Memory\n{}", lines.join("\n")))
    }

    /// Assembles the fixed-order context block consumed by the generator
    /// on every turn (spec §4.9): identity files, memory scope files,
    /// explicit memories, signal stream snapshots, then a fixed
    /// capabilities block. Empty sections are dropped.
    pub fn load_memory_context(&self, project_path: &str, agent_id: &str) -> String {
        let mut sections: Vec<String> = Vec::new();

        let identity_files = self.read_identity_files();
        if !identity_files.is_empty() {
            sections.push(format!("## Identity\n{}", identity_files.join("\n\n")));
        }

        let project_hash = SessionStore::project_hash(project_path);
        let mut memory_context = Vec::new();
        if let Some(global) = self.read_memory_scope("global") {
            memory_context.push(format!("### Global\n{global}"));
        }
        if let Some(project) = self.read_memory_scope(&format!("project-{project_hash}")) {
            memory_context.push(format!("### Project\n{project}"));
        }
        if let Some(agent) = self.read_memory_scope(&format!("agent-{agent_id}")) {
            memory_context.push(format!("### Agent\n{agent}"));
        }
        if !memory_context.is_empty() {
            sections.push(format!("## Memory Context\n{}", memory_context.join("\n\n")));
        }

        if let Some(explicit) = self.explicit_memory_section() {
            sections.push(explicit);
        }

        let mut streams = Vec::new();
        for stream in PERSISTED_STREAMS {
            if let Some(snapshot) = self.read_stream_snapshot(stream, Some(STREAM_SNAPSHOT_CHAR_LIMIT)) {
                streams.push(format!("### {stream}\n{snapshot}"));
            }
        }
        if let Some(flow) = self.read_stream_snapshot("flow", None) {
            streams.push(format!("### flow\n{flow}"));
        }
        if !streams.is_empty() {
            sections.push(format!("## Signal Streams\n{}", streams.join("\n\n")));
        }

        sections.push(MEMORY_CAPABILITIES_BLOCK.to_string());
        sections.join("\n\n")
    }

    fn infer_category(text: &str) -> &'static str {
        let lower = text.to_lowercase();
        if lower.contains("prefer") || lower.contains("style") || lower.contains("like") {
            "preference"
        } else if lower.contains("bug") || lower.contains("fix") || lower.contains("broke") {
            "bugfix"
        } else if lower.contains("deadline") || lower.contains("due") || lower.contains("ship") {
            "deadline"
        } else {
            "general"
        }
    }

    /// Parses the small deterministic command grammar: `remember X`,
    /// `forget X`, `recall X`, `list [category]`. Returns `None` if `text`
    /// does not match any command verb.
    pub fn handle_memory_command(&self, text: &str, session_id: Option<&str>) -> Option<String> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        if let Some(rest) = lower.strip_prefix("remember ") {
            let content = &trimmed[trimmed.len() - rest.len()..];
            let category = Self::infer_category(content);
            let id = Uuid::new_v4().to_string();
            match self.session_store.storage().insert_explicit_memory(&id, category, content, "explicit", session_id) {
                Ok(()) => return Some(format!("Remembered ({category}): {content}")),
                Err(e) => return Some(format!("Failed to remember: {e}")),
            }
        }

        if let Some(rest) = lower.strip_prefix("forget ") {
            let pattern = &trimmed[trimmed.len() - rest.len()..];
            return match self.session_store.storage().forget_matching(pattern) {
                Ok(count) => Some(format!("Forgot {count} matching memor{}", if count == 1 { "y" } else { "ies" })),
                Err(e) => Some(format!("Failed to forget: {e}")),
            };
        }

        if let Some(rest) = lower.strip_prefix("recall ") {
            let query = &trimmed[trimmed.len() - rest.len()..];
            let query_lower = query.to_lowercase();
            let rows = self.session_store.storage().list_explicit_memories(None, 500).ok()?;
            let now = Utc::now();
            let mut matches: Vec<(f64, String)> = rows
                .into_iter()
                .filter(|(_, _, content, _)| content.to_lowercase().contains(&query_lower))
                .map(|(_, category, content, created_at)| {
                    let age_days = (now - created_at).num_milliseconds() as f64 / 86_400_000.0;
                    (Self::decayed_confidence(age_days), format!("[{category}] {content}"))
                })
                .collect();
            matches.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            matches.truncate(5);
            return Some(if matches.is_empty() {
                format!("No memories found matching \"{query}\"")
            } else {
                matches.into_iter().map(|(_, line)| line).collect::<Vec<_>>().join("\n")
            });
        }

        if lower == "list" || lower.starts_with("list ") {
            let category = lower.strip_prefix("list").map(|s| s.trim()).filter(|s| !s.is_empty());
            let rows = self.session_store.storage().list_explicit_memories(category, 20).ok()?;
            return Some(if rows.is_empty() {
                "No memories stored".to_string()
            } else {
                rows.into_iter()
                    .map(|(_, category, content, _)| format!("[{category}] {content}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }

        None
    }
}

/// Parameters for appending raw content to an append-only signal stream.
/// Exposed for the daemon shell to drive from background observers
/// (identity edits, project scans, task tracker hooks); the bridge itself
/// never writes streams on its own initiative.
pub fn append_to_stream(home: &Path, stream: &str, entry: &str) -> std::io::Result<()> {
    let dir = home.join("streams");
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{stream}.md"));
    use std::io::Write;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", entry.trim_end())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecallSettings;
    use tempfile::tempdir;

    fn bridge(home: &Path) -> MemoryBridge {
        let store = Arc::new(SessionStore::open(home).unwrap());
        let recall = Arc::new(RecallEngine::new(RecallSettings::default()));
        MemoryBridge::new(store, recall)
    }

    #[tokio::test]
    async fn init_session_then_record_turns_round_trips() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        let session_id = bridge.init_session("agent-a", Some("test"), "model-x", "/tmp/project").unwrap();
        bridge.record_user_turn(&session_id, "hello").unwrap();
        bridge.record_assistant_turn(&session_id, "hi there", Vec::new()).unwrap();

        let session = bridge.session(&session_id).unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].content, "hello");
    }

    #[test]
    fn remember_then_recall_round_trips() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        let response = bridge.handle_memory_command("remember the user prefers tabs over spaces", None);
        assert!(response.unwrap().starts_with("Remembered"));

        let recalled = bridge.handle_memory_command("recall tabs", None).unwrap();
        assert!(recalled.contains("tabs"));
    }

    #[test]
    fn forget_removes_matching_memory() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        bridge.handle_memory_command("remember this project ships on Friday", None);
        let response = bridge.handle_memory_command("forget ships on Friday", None).unwrap();
        assert!(response.contains("Forgot 1"));
    }

    #[test]
    fn non_command_text_returns_none() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        assert!(bridge.handle_memory_command("what is the weather today", None).is_none());
    }

    #[test]
    fn load_memory_context_always_includes_capabilities_block() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        let context = bridge.load_memory_context("/tmp/project", "agent-a");
        assert!(context.contains("Memory Capabilities"));
    }

    #[test]
    fn load_memory_context_surfaces_scope_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("memory")).unwrap();
        fs::write(dir.path().join("memory").join("global.md"), "be concise").unwrap();
        let bridge = bridge(dir.path());
        let context = bridge.load_memory_context("/tmp/project", "agent-a");
        assert!(context.contains("be concise"));
    }

    #[test]
    fn bubble_up_findings_appends_to_parent() {
        let dir = tempdir().unwrap();
        let bridge = bridge(dir.path());
        let parent = bridge.init_session("agent-a", None, "model-x", "/tmp/project").unwrap();
        let sub = bridge.create_sub_session(&parent, "investigate flaky test", "agent-a", "model-x", "/tmp/project").unwrap();
        bridge.bubble_up_findings(&parent, &sub, "root cause: race in retry loop").unwrap();

        let session = bridge.session(&parent).unwrap();
        assert!(session.turns.last().unwrap().content.contains("race in retry loop"));
    }
}
