//! SQLite mirror index. Markdown is the source of truth (see
//! [`super::markdown`]); this struct owns the rebuildable index used for
//! fast lookups, FTS5 lexical search, and the vector/nidra tables.
//!
//! Mirrors the teacher's separate reader/writer `Mutex<Connection>` split:
//! `Storage` stays `Send + Sync` and is usable behind a plain `Arc<Storage>`
//! rather than forcing every caller through `Arc<Mutex<Storage>>`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{ApprovalEventRow, NidraRow, Role, SessionMeta, ToolCall, Turn};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("markdown error: {0}")]
    Markdown(#[from] super::markdown::MarkdownError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct Storage {
    reader: Mutex<Connection>,
    writer: Mutex<Connection>,
    db_path: PathBuf,
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(())
}

#[cfg(unix)]
fn harden_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = path.parent() {
        if parent.exists() {
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    if path.exists() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn harden_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl Storage {
    /// Open (creating if necessary) the mirror database at `db_path`,
    /// applying migrations and tuning PRAGMAs.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Connection::open(&db_path)?;
        configure_connection(&writer)?;
        super::migrations::apply_migrations(&mut writer)?;
        harden_permissions(&db_path)?;

        let reader = Connection::open(&db_path)?;
        configure_connection(&reader)?;

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn upsert_session(&self, meta: &SessionMeta) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO sessions (
                id, project_path_hash, title, agent_id, model_id, parent_session_id,
                created_at, updated_at, total_cost, total_tokens, tags, branch, turn_count
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
            ON CONFLICT(id) DO UPDATE SET
                title=excluded.title, updated_at=excluded.updated_at,
                total_cost=excluded.total_cost, total_tokens=excluded.total_tokens,
                tags=excluded.tags, branch=excluded.branch, turn_count=excluded.turn_count",
            params![
                meta.id,
                meta.project_path_hash,
                meta.title,
                meta.agent_id,
                meta.model_id,
                meta.parent_session_id,
                meta.created_at.to_rfc3339(),
                meta.updated_at.to_rfc3339(),
                meta.total_cost,
                meta.total_tokens as i64,
                meta.tags.join(","),
                meta.branch,
                meta.turn_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_session_meta(&self, id: &str) -> Result<Option<SessionMeta>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row(
            "SELECT id, project_path_hash, title, agent_id, model_id, parent_session_id,
                    created_at, updated_at, total_cost, total_tokens, tags, branch, turn_count
             FROM sessions WHERE id = ?1",
            [id],
            row_to_session_meta,
        )
        .optional()
        .map_err(StorageError::from)
    }

    pub fn list_sessions(&self, project_hash: Option<&str>) -> Result<Vec<SessionMeta>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let base = "SELECT id, project_path_hash, title, agent_id, model_id, parent_session_id,
                    created_at, updated_at, total_cost, total_tokens, tags, branch, turn_count
             FROM sessions";
        let mut rows = Vec::new();
        if let Some(hash) = project_hash {
            let mut stmt = conn.prepare(&format!("{base} WHERE project_path_hash = ?1 ORDER BY updated_at DESC"))?;
            let mapped = stmt.query_map([hash], row_to_session_meta)?;
            for r in mapped {
                rows.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(&format!("{base} ORDER BY updated_at DESC"))?;
            let mapped = stmt.query_map([], row_to_session_meta)?;
            for r in mapped {
                rows.push(r?);
            }
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Idempotent on `(session_id, turn_number)`: a replay of the same
    /// write is a no-op thanks to `INSERT OR IGNORE`.
    pub fn insert_turn(&self, turn: &Turn) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let tool_calls_json = serde_json::to_string(&turn.tool_calls)?;
        conn.execute(
            "INSERT OR IGNORE INTO turns (
                session_id, turn_number, role, content, tool_calls_json, agent_id, model_id, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                turn.session_id,
                turn.turn_number as i64,
                turn.role.as_str(),
                turn.content,
                tool_calls_json,
                turn.agent_id,
                turn.model_id,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT session_id, turn_number, role, content, tool_calls_json, agent_id, model_id, created_at
             FROM turns WHERE session_id = ?1 ORDER BY turn_number ASC",
        )?;
        let mapped = stmt.query_map([session_id], row_to_turn)?;
        let mut out = Vec::new();
        for r in mapped {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(String, u32, f64)>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }
        let mut stmt = conn.prepare(
            "SELECT session_id, turn_number, bm25(turns_fts) AS score
             FROM turns_fts WHERE turns_fts MATCH ?1 ORDER BY score LIMIT ?2",
        )?;
        let mapped = stmt.query_map(params![sanitized, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32, row.get::<_, f64>(2)?))
        })?;
        let mut out = Vec::new();
        for r in mapped {
            out.push(r?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Embeddings (vector mirror)
    // ------------------------------------------------------------------

    pub fn upsert_embedding(
        &self,
        entry_id: &str,
        vector: &[f32],
        text: &str,
        source_type: &str,
        source_id: &str,
        metadata_json: &str,
    ) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let blob: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        conn.execute(
            "INSERT INTO embeddings (entry_id, vector, text, source_type, source_id, dimensions, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(entry_id) DO UPDATE SET vector=excluded.vector, text=excluded.text, metadata=excluded.metadata",
            params![
                entry_id,
                blob,
                text,
                source_type,
                source_id,
                vector.len() as i64,
                metadata_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn all_embeddings(&self) -> Result<Vec<(String, Vec<f32>, String, String, String)>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT entry_id, vector, text, source_type, source_id FROM embeddings",
        )?;
        let mapped = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(1)?;
            let vector: Vec<f32> = blob
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok((
                row.get::<_, String>(0)?,
                vector,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in mapped {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn clear_embeddings(&self) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute("DELETE FROM embeddings", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Nidra singleton row
    // ------------------------------------------------------------------

    pub fn get_nidra_row(&self) -> Result<Option<NidraRow>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row(
            "SELECT current_state, last_state_change, last_heartbeat, last_consolidation_start,
                    last_consolidation_end, consolidation_phase, consolidation_progress
             FROM nidra_state WHERE id = 1",
            [],
            row_to_nidra_row,
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Writes the whole Nidra singleton row. There is at most one row
    /// (`id = 1`): this always upserts, never inserts a second row.
    pub fn upsert_nidra_row_full(&self, row: &NidraRow) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO nidra_state (
                id, current_state, last_state_change, last_heartbeat,
                last_consolidation_start, last_consolidation_end,
                consolidation_phase, consolidation_progress, updated_at
             ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                current_state=excluded.current_state,
                last_state_change=excluded.last_state_change,
                last_heartbeat=excluded.last_heartbeat,
                last_consolidation_start=excluded.last_consolidation_start,
                last_consolidation_end=excluded.last_consolidation_end,
                consolidation_phase=excluded.consolidation_phase,
                consolidation_progress=excluded.consolidation_progress,
                updated_at=excluded.updated_at",
            params![
                row.current_state,
                row.last_state_change.to_rfc3339(),
                row.last_heartbeat.to_rfc3339(),
                row.last_consolidation_start.map(|t| t.to_rfc3339()),
                row.last_consolidation_end.map(|t| t.to_rfc3339()),
                row.consolidation_phase,
                row.consolidation_progress,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Explicit memory store (Smaran)
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_explicit_memory(
        &self,
        id: &str,
        category: &str,
        content: &str,
        source: &str,
        session_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO explicit_memories (id, category, content, source, session_id, confidence, created_at)
             VALUES (?1,?2,?3,?4,?5,1.0,?6)",
            params![id, category, content, source, session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_explicit_memories(&self, category: Option<&str>, limit: usize) -> Result<Vec<(String, String, String, DateTime<Utc>)>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut rows = Vec::new();
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, String, String, DateTime<Utc>)> {
            let created: String = row.get(3)?;
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                DateTime::parse_from_rfc3339(&created)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            ))
        };
        if let Some(cat) = category {
            let mut stmt = conn.prepare(
                "SELECT id, category, content, created_at FROM explicit_memories WHERE category = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            for r in stmt.query_map(params![cat, limit as i64], map_row)? {
                rows.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, category, content, created_at FROM explicit_memories ORDER BY created_at DESC LIMIT ?1",
            )?;
            for r in stmt.query_map(params![limit as i64], map_row)? {
                rows.push(r?);
            }
        }
        Ok(rows)
    }

    /// Deletes memories whose content contains `substring`; returns the
    /// count removed.
    pub fn forget_matching(&self, substring: &str) -> Result<usize> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let pattern = format!("%{substring}%");
        let count = conn.execute("DELETE FROM explicit_memories WHERE content LIKE ?1", params![pattern])?;
        Ok(count)
    }

    pub fn upsert_nidra_row(
        &self,
        state: &str,
        last_state_change: DateTime<Utc>,
        last_heartbeat: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert_nidra_row_full(&NidraRow {
            current_state: state.to_string(),
            last_state_change,
            last_heartbeat,
            last_consolidation_start: None,
            last_consolidation_end: None,
            consolidation_phase: None,
            consolidation_progress: 0.0,
        })
    }

    // ------------------------------------------------------------------
    // Approval events (Component F, spec §3.8 / §6.6)
    // ------------------------------------------------------------------

    pub fn insert_approval_event(&self, row: &ApprovalEventRow) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO approval_events (
                id, agent_id, session_id, action, reason, status, created_at, expires_at,
                resolved_at, resolved_by, resolution_reason
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                row.id,
                row.agent_id,
                row.session_id,
                row.action,
                row.reason,
                row.status,
                row.created_at.to_rfc3339(),
                row.expires_at.to_rfc3339(),
                row.resolved_at.map(|t| t.to_rfc3339()),
                row.resolved_by,
                row.resolution_reason,
            ],
        )?;
        Ok(())
    }

    pub fn update_approval_event(&self, row: &ApprovalEventRow) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "UPDATE approval_events SET status=?2, resolved_at=?3, resolved_by=?4, resolution_reason=?5
             WHERE id=?1",
            params![
                row.id,
                row.status,
                row.resolved_at.map(|t| t.to_rfc3339()),
                row.resolved_by,
                row.resolution_reason,
            ],
        )?;
        Ok(())
    }

    pub fn list_approval_events(&self, limit: usize) -> Result<Vec<ApprovalEventRow>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, session_id, action, reason, status, created_at, expires_at,
                    resolved_at, resolved_by, resolution_reason
             FROM approval_events ORDER BY created_at DESC LIMIT ?1",
        )?;
        let mapped = stmt.query_map(params![limit as i64], row_to_approval_event)?;
        let mut out = Vec::new();
        for r in mapped {
            out.push(r?);
        }
        Ok(out)
    }
}

fn row_to_session_meta(row: &rusqlite::Row) -> rusqlite::Result<SessionMeta> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let tags: String = row.get(10)?;
    Ok(SessionMeta {
        id: row.get(0)?,
        project_path_hash: row.get(1)?,
        title: row.get(2)?,
        agent_id: row.get(3)?,
        model_id: row.get(4)?,
        parent_session_id: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        total_cost: row.get(8)?,
        total_tokens: row.get::<_, i64>(9)? as u64,
        tags: tags.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
        branch: row.get(11)?,
        turn_count: row.get::<_, i64>(12)? as u32,
        metadata: Default::default(),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_nidra_row(row: &rusqlite::Row) -> rusqlite::Result<NidraRow> {
    let change: String = row.get(1)?;
    let heartbeat: String = row.get(2)?;
    let start: Option<String> = row.get(3)?;
    let end: Option<String> = row.get(4)?;
    Ok(NidraRow {
        current_state: row.get(0)?,
        last_state_change: parse_rfc3339(&change),
        last_heartbeat: parse_rfc3339(&heartbeat),
        last_consolidation_start: start.map(|s| parse_rfc3339(&s)),
        last_consolidation_end: end.map(|s| parse_rfc3339(&s)),
        consolidation_phase: row.get(5)?,
        consolidation_progress: row.get(6)?,
    })
}

fn row_to_approval_event(row: &rusqlite::Row) -> rusqlite::Result<ApprovalEventRow> {
    let created: String = row.get(6)?;
    let expires: String = row.get(7)?;
    let resolved: Option<String> = row.get(8)?;
    Ok(ApprovalEventRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        session_id: row.get(2)?,
        action: row.get(3)?,
        reason: row.get(4)?,
        status: row.get(5)?,
        created_at: parse_rfc3339(&created),
        expires_at: parse_rfc3339(&expires),
        resolved_at: resolved.map(|s| parse_rfc3339(&s)),
        resolved_by: row.get(9)?,
        resolution_reason: row.get(10)?,
    })
}

fn row_to_turn(row: &rusqlite::Row) -> rusqlite::Result<Turn> {
    let role_str: String = row.get(2)?;
    let tool_calls_json: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let tool_calls: Vec<ToolCall> = serde_json::from_str(&tool_calls_json).unwrap_or_default();
    Ok(Turn {
        session_id: row.get(0)?,
        turn_number: row.get::<_, i64>(1)? as u32,
        role: Role::parse(&role_str).unwrap_or(Role::User),
        content: row.get(3)?,
        tool_calls,
        agent_id: row.get(5)?,
        model_id: row.get(6)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Escape FTS5 query special characters by quoting each token; keeps the
/// match scoped to a simple AND-of-tokens query regardless of user input.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            let cleaned: String = tok.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.is_empty() {
                String::new()
            } else {
                format!("\"{cleaned}\"")
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
