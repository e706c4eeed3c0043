//! Test world builder: an isolated `<home>` directory wired up with a
//! `SessionStore` and `RecallEngine`, mirroring how `antara-daemon`
//! constructs the core at startup (see `antara-daemon/src/main.rs`).

use antara_core::config::RecallSettings;
use antara_core::{RecallEngine, Role, SessionStore, Turn, ToolCall};
use chrono::Utc;
use tempfile::TempDir;

/// Owns a temporary `<home>` directory for the lifetime of a test; the
/// directory and everything under it is deleted on drop.
pub struct TestWorld {
    _home: TempDir,
    pub store: SessionStore,
    pub recall: RecallEngine,
}

impl TestWorld {
    pub fn new() -> Self {
        let home = TempDir::new().expect("failed to create temp home");
        let store = SessionStore::open(home.path()).expect("failed to open session store");
        let recall = RecallEngine::new(RecallSettings::default());
        Self { _home: home, store, recall }
    }

    pub fn home(&self) -> &std::path::Path {
        self._home.path()
    }

    /// Creates a session and appends `contents` as alternating user/
    /// assistant turns (first turn is always `user`), indexing each
    /// assistant turn into recall the way `MemoryBridge::record_assistant_turn`
    /// does.
    pub fn seed_session(&self, project: &str, agent: &str, model: &str, contents: &[&str]) -> String {
        let mut meta = self
            .store
            .create_session(project, agent, model, None, None)
            .expect("failed to create session");

        for (i, content) in contents.iter().enumerate() {
            let turn_number = (i as u64) + 1;
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let turn = Turn {
                session_id: meta.id.clone(),
                turn_number,
                role,
                content: content.to_string(),
                tool_calls: Vec::<ToolCall>::new(),
                agent_id: None,
                model_id: None,
                created_at: Utc::now(),
            };
            self.store.add_turn(&mut meta, turn).expect("failed to add turn");
            if role == Role::Assistant {
                self.recall
                    .index_text(self.store.storage(), "session", &meta.id, content)
                    .expect("failed to index turn");
            }
        }
        meta.id
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_session_creates_dense_turn_numbers() {
        let world = TestWorld::new();
        let id = world.seed_session("/tmp/proj", "agent-a", "model-x", &["hi", "hello back"]);
        let session = world.store.load_session("/tmp/proj", &id).unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].turn_number, 1);
        assert_eq!(session.turns[1].turn_number, 2);
    }
}
