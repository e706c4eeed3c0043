//! Session & Memory Store (spec §4.1, Smriti).
//!
//! Markdown files under `<home>/sessions/<project-hash>/<id>.md` are the
//! source of truth; the SQLite mirror (`sqlite.rs`) is a rebuildable index
//! used for fast listing and FTS lexical search. `SessionStore::add_turn`
//! writes Markdown first: if the index write fails it is logged and
//! swallowed, matching the teacher's policy of treating the index as
//! disposable.

mod markdown;
mod migrations;
mod sqlite;
mod types;

pub use sqlite::{sanitize_fts5_query, Storage, StorageError};
pub use types::{ApprovalEventRow, MemoryScope, NidraRow, Role, Session, SessionMeta, ToolCall, Turn};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::util::fnv1a_hex12;

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct SessionStore {
    home: PathBuf,
    storage: Storage,
}

impl SessionStore {
    pub fn open(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let storage = Storage::open(home.join("sessions.db"))?;
        Ok(Self { home, storage })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Hash a project path into the 12-hex scope key used to bucket
    /// sessions on disk (spec §3.1).
    pub fn project_hash(project_path: &str) -> String {
        fnv1a_hex12(project_path)
    }

    pub fn create_session(
        &self,
        project_path: &str,
        agent_id: &str,
        model_id: &str,
        parent_session_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<SessionMeta> {
        let now = Utc::now();
        let meta = SessionMeta {
            id: Uuid::new_v4().to_string(),
            project_path_hash: Self::project_hash(project_path),
            title: title.map(String::from),
            agent_id: agent_id.to_string(),
            model_id: model_id.to_string(),
            parent_session_id: parent_session_id.map(String::from),
            created_at: now,
            updated_at: now,
            total_cost: 0.0,
            total_tokens: 0,
            tags: Vec::new(),
            branch: None,
            turn_count: 0,
            metadata: BTreeMap::new(),
        };
        markdown::write_new(&self.home, &meta)?;
        self.storage.upsert_session(&meta)?;
        Ok(meta)
    }

    /// Reads the Markdown file (falling back to the index only for the
    /// session path, never for turn content). `SessionNotFound` if neither
    /// exists.
    pub fn load_session(&self, project_path: &str, session_id: &str) -> Result<Session> {
        self.load_session_by_hash(&Self::project_hash(project_path), session_id)
    }

    /// Same as [`Self::load_session`] but takes the already-hashed project
    /// scope key directly; used by callers (e.g. Chitragupta) that only
    /// have `SessionMeta::project_path_hash` on hand, never the raw path.
    pub fn load_session_by_hash(&self, project_hash: &str, session_id: &str) -> Result<Session> {
        let path = markdown_path(&self.home, project_hash, session_id);
        if !path.exists() {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        let (meta, turns) = markdown::parse(&path)?;
        Ok(Session { meta, turns })
    }

    /// Appends a turn. Idempotent on `(session_id, turn_number)`: a turn
    /// number already reflected in `meta.turn_count` was already recorded
    /// (turn numbers are dense and strictly increasing), so re-applying it
    /// is a no-op on both the Markdown transcript and the index -- no file
    /// append, no row write.
    pub fn add_turn(&self, meta: &mut SessionMeta, turn: Turn) -> Result<()> {
        if turn.turn_number <= meta.turn_count {
            return Ok(());
        }
        markdown::append_turn(&self.home, meta, &turn)?;
        meta.turn_count = meta.turn_count.max(turn.turn_number);
        meta.updated_at = turn.created_at;
        self.storage.upsert_session(meta)?;
        if let Err(e) = self.storage.insert_turn(&turn) {
            tracing::warn!(error = %e, "failed to mirror turn into sqlite index; markdown remains authoritative");
        }
        Ok(())
    }

    pub fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionMeta>> {
        let hash = project_path.map(Self::project_hash);
        self.storage.list_sessions(hash.as_deref())
    }

    pub fn branch_session(
        &self,
        source: &SessionMeta,
        project_path: &str,
        branch_name: Option<&str>,
    ) -> Result<SessionMeta> {
        let now = Utc::now();
        let meta = SessionMeta {
            id: Uuid::new_v4().to_string(),
            project_path_hash: Self::project_hash(project_path),
            title: source.title.clone(),
            agent_id: source.agent_id.clone(),
            model_id: source.model_id.clone(),
            parent_session_id: Some(source.id.clone()),
            created_at: now,
            updated_at: now,
            total_cost: 0.0,
            total_tokens: 0,
            tags: source.tags.clone(),
            branch: branch_name.map(String::from),
            turn_count: 0,
            metadata: BTreeMap::new(),
        };
        markdown::write_new(&self.home, &meta)?;
        self.storage.upsert_session(&meta)?;
        Ok(meta)
    }

    /// Rebuilds the lexical mirror from Markdown for every session under
    /// `project_path` (or all sessions if `None`). Safe to interrupt.
    pub fn reindex_all(&self, project_path: Option<&str>) -> Result<usize> {
        let mut reindexed = 0;
        for meta in self.list_sessions(project_path)? {
            let path = markdown_path(&self.home, &meta.project_path_hash, &meta.id);
            if let Ok((parsed_meta, turns)) = markdown::parse(&path) {
                self.storage.upsert_session(&parsed_meta)?;
                for turn in turns {
                    self.storage.insert_turn(&turn)?;
                }
                reindexed += 1;
            }
        }
        Ok(reindexed)
    }
}

fn markdown_path(home: &Path, project_hash: &str, session_id: &str) -> PathBuf {
    markdown::session_path(home, project_hash, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn consecutive_turns_replay_identically() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut meta = store
            .create_session("/tmp/project", "agent-a", "model-x", None, None)
            .unwrap();

        let turn1 = Turn {
            session_id: meta.id.clone(),
            turn_number: 1,
            role: Role::User,
            content: "hi".to_string(),
            tool_calls: vec![],
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        };
        store.add_turn(&mut meta, turn1).unwrap();

        let turn2 = Turn {
            session_id: meta.id.clone(),
            turn_number: 2,
            role: Role::Assistant,
            content: "hello".to_string(),
            tool_calls: vec![],
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        };
        store.add_turn(&mut meta, turn2).unwrap();

        let loaded = store.load_session("/tmp/project", &meta.id).unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].turn_number, 1);
        assert_eq!(loaded.turns[0].content, "hi");
        assert_eq!(loaded.turns[1].turn_number, 2);
        assert_eq!(loaded.turns[1].content, "hello");
    }

    #[test]
    fn same_project_path_hashes_identically() {
        assert_eq!(
            SessionStore::project_hash("/a/b"),
            SessionStore::project_hash("/a/b")
        );
        assert_ne!(
            SessionStore::project_hash("/a/b"),
            SessionStore::project_hash("/a/c")
        );
    }

    #[test]
    fn branch_session_carries_parent_reference() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let source = store
            .create_session("/tmp/p", "agent-a", "model-x", None, Some("Original"))
            .unwrap();
        let branch = store.branch_session(&source, "/tmp/p", Some("experiment")).unwrap();
        assert_eq!(branch.parent_session_id, Some(source.id));
        assert_eq!(branch.branch.as_deref(), Some("experiment"));
    }

    #[test]
    fn load_missing_session_errors() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let err = store.load_session("/tmp/p", "nonexistent").unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }
}
