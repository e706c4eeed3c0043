//! Markdown-as-truth serialization for a session (spec §6.2).
//!
//! Frontmatter carries [`SessionMeta`] as simple `key: value` lines (not
//! full YAML -- we only ever write what we read, and keeping the parser
//! hand-rolled avoids pulling in a YAML dependency for a few scalar
//! fields). The body is a sequence of `## Turn N (role)` sections; tool
//! calls render as fenced `tool:<name>` blocks carrying JSON args/result.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::types::{Role, SessionMeta, ToolCall, Turn};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MarkdownError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {0} has no frontmatter block")]
    MissingFrontmatter(PathBuf),
    #[error("session file {path} missing required field `{field}`")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("session file {path} has malformed field `{field}`: {value}")]
    MalformedField {
        path: PathBuf,
        field: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, MarkdownError>;

pub fn session_path(home: &Path, project_hash: &str, session_id: &str) -> PathBuf {
    home.join("sessions")
        .join(project_hash)
        .join(format!("{session_id}.md"))
}

fn write_frontmatter(meta: &SessionMeta) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    let _ = writeln!(out, "id: {}", meta.id);
    let _ = writeln!(out, "project_path_hash: {}", meta.project_path_hash);
    if let Some(title) = &meta.title {
        let _ = writeln!(out, "title: {title}");
    }
    let _ = writeln!(out, "agent_id: {}", meta.agent_id);
    let _ = writeln!(out, "model_id: {}", meta.model_id);
    if let Some(parent) = &meta.parent_session_id {
        let _ = writeln!(out, "parent_session_id: {parent}");
    }
    let _ = writeln!(out, "created_at: {}", meta.created_at.to_rfc3339());
    let _ = writeln!(out, "updated_at: {}", meta.updated_at.to_rfc3339());
    let _ = writeln!(out, "total_cost: {}", meta.total_cost);
    let _ = writeln!(out, "total_tokens: {}", meta.total_tokens);
    let _ = writeln!(out, "tags: {}", meta.tags.join(","));
    if let Some(branch) = &meta.branch {
        let _ = writeln!(out, "branch: {branch}");
    }
    let _ = writeln!(out, "turn_count: {}", meta.turn_count);
    for (k, v) in &meta.metadata {
        let _ = writeln!(out, "meta:{k}: {v}");
    }
    out.push_str("---\n");
    out
}

fn render_turn(turn: &Turn) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n## Turn {} ({})",
        turn.turn_number,
        turn.role.as_str()
    );
    out.push('\n');
    out.push_str(&turn.content);
    out.push('\n');
    for call in &turn.tool_calls {
        let _ = writeln!(out, "\n```tool:{}", call.name);
        let _ = writeln!(out, "args: {}", call.args_json);
        if let Some(result) = &call.result_json {
            let _ = writeln!(out, "result: {result}");
        }
        let _ = writeln!(out, "error: {}", call.is_error);
        out.push_str("```\n");
    }
    out
}

/// Write a brand-new session file (frontmatter only, empty body).
pub fn write_new(home: &Path, meta: &SessionMeta) -> Result<()> {
    let path = session_path(home, &meta.project_path_hash, &meta.id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| MarkdownError::Io {
            path: path.clone(),
            source,
        })?;
    }
    std::fs::write(&path, write_frontmatter(meta)).map_err(|source| MarkdownError::Io {
        path,
        source,
    })
}

/// Append a turn and refresh the frontmatter in place (rewrite-whole-file;
/// session files are small enough that this is simpler and safer than
/// in-place patching).
pub fn append_turn(home: &Path, meta: &SessionMeta, turn: &Turn) -> Result<()> {
    let path = session_path(home, &meta.project_path_hash, &meta.id);
    let mut contents = std::fs::read_to_string(&path).unwrap_or_default();
    if contents.is_empty() {
        contents = write_frontmatter(meta);
    } else {
        contents = replace_frontmatter(&contents, meta);
    }
    contents.push_str(&render_turn(turn));
    std::fs::write(&path, contents).map_err(|source| MarkdownError::Io { path, source })
}

fn replace_frontmatter(contents: &str, meta: &SessionMeta) -> String {
    if let Some(rest) = contents.strip_prefix("---\n") {
        if let Some(end) = rest.find("---\n") {
            let body = &rest[end + 4..];
            let mut out = write_frontmatter(meta);
            out.push_str(body);
            return out;
        }
    }
    let mut out = write_frontmatter(meta);
    out.push_str(contents);
    out
}

/// Parse a session file back into meta + ordered turns. This is the sole
/// authority for replay: the SQLite mirror is rebuildable from this.
pub fn parse(path: &Path) -> Result<(SessionMeta, Vec<Turn>)> {
    let contents = std::fs::read_to_string(path).map_err(|source| MarkdownError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let rest = contents
        .strip_prefix("---\n")
        .ok_or_else(|| MarkdownError::MissingFrontmatter(path.to_path_buf()))?;
    let end = rest
        .find("---\n")
        .ok_or_else(|| MarkdownError::MissingFrontmatter(path.to_path_buf()))?;
    let frontmatter = &rest[..end];
    let body = &rest[end + 4..];

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    for line in frontmatter.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            if let Some(meta_key) = key.strip_prefix("meta:") {
                metadata.insert(meta_key.to_string(), value.to_string());
            } else {
                fields.insert(key.to_string(), value.to_string());
            }
        }
    }

    let field = |name: &'static str| -> Result<String> {
        fields
            .get(name)
            .cloned()
            .ok_or(MarkdownError::MissingField {
                path: path.to_path_buf(),
                field: name,
            })
    };
    let parse_dt = |name: &'static str, raw: &str| -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| MarkdownError::MalformedField {
                path: path.to_path_buf(),
                field: name,
                value: raw.to_string(),
            })
    };

    let created_raw = field("created_at")?;
    let updated_raw = field("updated_at")?;
    let meta = SessionMeta {
        id: field("id")?,
        project_path_hash: field("project_path_hash")?,
        title: fields.get("title").cloned(),
        agent_id: field("agent_id")?,
        model_id: field("model_id")?,
        parent_session_id: fields.get("parent_session_id").cloned(),
        created_at: parse_dt("created_at", &created_raw)?,
        updated_at: parse_dt("updated_at", &updated_raw)?,
        total_cost: fields
            .get("total_cost")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
        total_tokens: fields
            .get("total_tokens")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        tags: fields
            .get("tags")
            .map(|v| v.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default(),
        branch: fields.get("branch").cloned(),
        turn_count: fields
            .get("turn_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        metadata,
    };

    let turns = parse_turns(&meta.id, body);
    Ok((meta, turns))
}

fn parse_turns(session_id: &str, body: &str) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut lines = body.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(header) = line.strip_prefix("## Turn ") else {
            continue;
        };
        let Some((num_str, role_str)) = header.split_once(' ') else {
            continue;
        };
        let Ok(turn_number) = num_str.parse::<u32>() else {
            continue;
        };
        let role_str = role_str.trim_start_matches('(').trim_end_matches(')');
        let Some(role) = Role::parse(role_str) else {
            continue;
        };

        let mut content_lines = Vec::new();
        let mut tool_calls = Vec::new();
        while let Some(next) = lines.peek() {
            if next.starts_with("## Turn ") {
                break;
            }
            let next = lines.next().unwrap();
            if let Some(tool_name) = next.strip_prefix("```tool:") {
                let mut args_json = String::new();
                let mut result_json = None;
                let mut is_error = false;
                for inner in lines.by_ref() {
                    if inner == "```" {
                        break;
                    }
                    if let Some(v) = inner.strip_prefix("args: ") {
                        args_json = v.to_string();
                    } else if let Some(v) = inner.strip_prefix("result: ") {
                        result_json = Some(v.to_string());
                    } else if let Some(v) = inner.strip_prefix("error: ") {
                        is_error = v == "true";
                    }
                }
                tool_calls.push(ToolCall {
                    name: tool_name.to_string(),
                    args_json,
                    result_json,
                    is_error,
                });
            } else {
                content_lines.push(next);
            }
        }

        let content = content_lines
            .into_iter()
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        turns.push(Turn {
            session_id: session_id.to_string(),
            turn_number,
            role,
            content,
            tool_calls,
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        });
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_meta() -> SessionMeta {
        let now = Utc::now();
        SessionMeta {
            id: "s1".to_string(),
            project_path_hash: "abc123abc123".to_string(),
            title: Some("Test session".to_string()),
            agent_id: "agent-a".to_string(),
            model_id: "model-x".to_string(),
            parent_session_id: None,
            created_at: now,
            updated_at: now,
            total_cost: 0.0,
            total_tokens: 0,
            tags: vec!["t1".to_string(), "t2".to_string()],
            branch: None,
            turn_count: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_frontmatter_and_turns() {
        let dir = tempdir().unwrap();
        let meta = sample_meta();
        write_new(dir.path(), &meta).unwrap();

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
        append_turn(dir.path(), &meta, &turn1).unwrap();

        let turn2 = Turn {
            session_id: meta.id.clone(),
            turn_number: 2,
            role: Role::Assistant,
            content: "hello".to_string(),
            tool_calls: vec![ToolCall {
                name: "search".to_string(),
                args_json: "{\"q\":\"hi\"}".to_string(),
                result_json: Some("{\"ok\":true}".to_string()),
                is_error: false,
            }],
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        };
        append_turn(dir.path(), &meta, &turn2).unwrap();

        let path = session_path(dir.path(), &meta.project_path_hash, &meta.id);
        let (parsed_meta, parsed_turns) = parse(&path).unwrap();

        assert_eq!(parsed_meta.id, meta.id);
        assert_eq!(parsed_meta.tags, meta.tags);
        assert_eq!(parsed_turns.len(), 2);
        assert_eq!(parsed_turns[0].turn_number, 1);
        assert_eq!(parsed_turns[0].content, "hi");
        assert_eq!(parsed_turns[1].content, "hello");
        assert_eq!(parsed_turns[1].tool_calls.len(), 1);
        assert_eq!(parsed_turns[1].tool_calls[0].name, "search");
    }
}
