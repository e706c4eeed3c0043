//! Versioned SQL migrations for the SQLite mirror index, following the
//! teacher's `Migration { version, description, up }` const-array pattern:
//! every migration is a raw, idempotent `CREATE ... IF NOT EXISTS` block
//! applied in order inside a single transaction, with the applied version
//! tracked in `schema_version`.

use rusqlite::Connection;

use super::sqlite::{Result, StorageError};

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "schema_version bookkeeping table",
        up: "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );",
    },
    Migration {
        version: 2,
        description: "sessions mirror table",
        up: "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project_path_hash TEXT NOT NULL,
            title TEXT,
            agent_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            parent_session_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            total_cost REAL NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '',
            branch TEXT,
            turn_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_path_hash);
        CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);",
    },
    Migration {
        version: 3,
        description: "turns mirror table + FTS5 index with sync triggers",
        up: "CREATE TABLE IF NOT EXISTS turns (
            session_id TEXT NOT NULL,
            turn_number INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_calls_json TEXT NOT NULL DEFAULT '[]',
            agent_id TEXT,
            model_id TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, turn_number)
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
            content,
            session_id UNINDEXED,
            turn_number UNINDEXED,
            content='turns',
            content_rowid='rowid'
        );
        CREATE TRIGGER IF NOT EXISTS turns_ai AFTER INSERT ON turns BEGIN
            INSERT INTO turns_fts(rowid, content, session_id, turn_number)
            VALUES (new.rowid, new.content, new.session_id, new.turn_number);
        END;
        CREATE TRIGGER IF NOT EXISTS turns_ad AFTER DELETE ON turns BEGIN
            INSERT INTO turns_fts(turns_fts, rowid, content, session_id, turn_number)
            VALUES ('delete', old.rowid, old.content, old.session_id, old.turn_number);
        END;
        CREATE TRIGGER IF NOT EXISTS turns_au AFTER UPDATE ON turns BEGIN
            INSERT INTO turns_fts(turns_fts, rowid, content, session_id, turn_number)
            VALUES ('delete', old.rowid, old.content, old.session_id, old.turn_number);
            INSERT INTO turns_fts(rowid, content, session_id, turn_number)
            VALUES (new.rowid, new.content, new.session_id, new.turn_number);
        END;",
    },
    Migration {
        version: 4,
        description: "vector index mirror",
        up: "CREATE TABLE IF NOT EXISTS embeddings (
            entry_id TEXT PRIMARY KEY,
            vector BLOB NOT NULL,
            text TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embeddings_source ON embeddings(source_type, source_id);",
    },
    Migration {
        version: 5,
        description: "nidra state singleton row",
        up: "CREATE TABLE IF NOT EXISTS nidra_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current_state TEXT NOT NULL,
            last_state_change TEXT NOT NULL,
            last_heartbeat TEXT NOT NULL,
            last_consolidation_start TEXT,
            last_consolidation_end TEXT,
            consolidation_phase TEXT,
            consolidation_progress REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );",
    },
    Migration {
        version: 6,
        description: "explicit memory store (Smaran) + approval event log",
        up: "CREATE TABLE IF NOT EXISTS explicit_memories (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL,
            session_id TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            last_recalled_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_explicit_category ON explicit_memories(category);
        CREATE TABLE IF NOT EXISTS approval_events (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            action TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by TEXT,
            resolution_reason TEXT
        );",
    },
];

pub fn get_current_version(conn: &Connection) -> Result<u32> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(false);
    if !exists {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(StorageError::from)
}

pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current = get_current_version(conn)?;
    let tx = conn.transaction().map_err(StorageError::from)?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tx.execute_batch(migration.up).map_err(StorageError::from)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(StorageError::from)?;
        tracing::debug!(version = migration.version, description = migration.description, "applied migration");
    }
    tx.commit().map_err(StorageError::from)?;
    Ok(())
}
