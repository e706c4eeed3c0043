//! Chitragupta: the calendar-aware consolidation orchestrator wrapping
//! Nidra (spec §4.3.2). Wires `Nidra::on_dream` to a same-day consolidation
//! pass, runs the Svapna five-phase pipeline per project, persists extracted
//! facts into global memory, and archives day files past retention.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};

use super::svapna::{has_assistant_activity, run_svapna, SvapnaProgress};
use super::Nidra;
use crate::store::{SessionStore, StorageError};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ChitraguptaError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Nidra(#[from] super::NidraError),
}

pub type Result<T> = std::result::Result<T, ChitraguptaError>;

#[derive(Debug, Clone, Default)]
pub struct ConsolidationSummary {
    pub date: String,
    pub sessions_processed: usize,
    pub project_count: usize,
    pub extracted_facts: usize,
    pub duration_ms: u64,
}

pub struct Chitragupta {
    home: PathBuf,
    nidra: Arc<Nidra>,
    running: AtomicBool,
    pub retention_months: u32,
    pub max_backfill_days: u32,
}

impl Chitragupta {
    pub fn new(home: impl Into<PathBuf>, nidra: Arc<Nidra>, retention_months: u32, max_backfill_days: u32) -> Self {
        Self {
            home: home.into(),
            nidra,
            running: AtomicBool::new(false),
            retention_months,
            max_backfill_days,
        }
    }

    pub fn nidra(&self) -> &Nidra {
        &self.nidra
    }

    /// Consolidates `date` against the sessions in `store`: writes/updates
    /// the day file, runs Svapna per distinct project, and persists
    /// extracted facts into global memory. Concurrent invocations for any
    /// date short-circuit (spec: "at most one consolidation runs at a
    /// time").
    pub fn consolidate_date(&self, store: &SessionStore, date: NaiveDate) -> Result<Option<ConsolidationSummary>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let result = self.consolidate_date_inner(store, date);
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    fn consolidate_date_inner(&self, store: &SessionStore, date: NaiveDate) -> Result<ConsolidationSummary> {
        let started = std::time::Instant::now();
        self.nidra.set_consolidation_window(store.storage(), Some(Utc::now()), None)?;
        self.nidra.set_consolidation_phase(store.storage(), Some("collecting"), 0.0)?;

        let all_sessions = store.list_sessions(None)?;
        let day_sessions: Vec<_> = all_sessions
            .into_iter()
            .filter(|m| m.updated_at.date_naive() == date)
            .collect();

        let mut projects: Vec<String> = day_sessions
            .iter()
            .map(|m| m.project_path_hash.clone())
            .collect();
        projects.sort();
        projects.dedup();

        let mut all_facts = Vec::new();
        let mut day_lines = vec![format!("# Day {date}"), String::new()];

        let project_count = projects.len();
        for (idx, project_hash) in projects.iter().enumerate() {
            let project_sessions: Vec<_> = day_sessions
                .iter()
                .filter(|m| &m.project_path_hash == project_hash)
                .collect();
            let mut turns = Vec::new();
            for meta in &project_sessions {
                if let Ok(session) = store.load_session_by_hash(project_hash, &meta.id) {
                    turns.extend(session.turns);
                }
            }
            if !has_assistant_activity(&turns) {
                continue;
            }
            day_lines.push(format!(
                "## Project {project_hash} ({} sessions, {} turns)",
                project_sessions.len(),
                turns.len()
            ));
            let phase_base = idx as f64 / projects.len().max(1) as f64;
            let phase_scale = 1.0 / projects.len().max(1) as f64;
            let report = run_svapna(&turns, |p: SvapnaProgress| {
                let _ = self.nidra.set_consolidation_phase(
                    store.storage(),
                    Some(p.phase.as_str()),
                    (phase_base + p.pct * phase_scale).clamp(0.0, 1.0),
                );
            });
            for insight in &report.insights {
                day_lines.push(format!("- {insight}"));
            }
            all_facts.extend(report.facts);
        }

        let day_path = day_file_path(&self.home, date);
        if let Some(parent) = day_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&day_path, day_lines.join("\n") + "\n")?;

        if !all_facts.is_empty() {
            self.append_global_facts(date, &all_facts)?;
        }

        self.nidra
            .set_consolidation_window(store.storage(), None, Some(Utc::now()))?;
        self.nidra.set_consolidation_phase(store.storage(), None, 0.0)?;

        Ok(ConsolidationSummary {
            date: date.to_string(),
            sessions_processed: day_sessions.len(),
            project_count,
            extracted_facts: all_facts.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn append_global_facts(&self, date: NaiveDate, facts: &[String]) -> Result<()> {
        let path = self.home.join("memory").join("global.md");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = fs::read_to_string(&path).unwrap_or_default();
        for fact in facts {
            contents.push_str(&format!("[{date}] {fact}\n"));
        }
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Runs consolidation for every missed day between the last recorded
    /// consolidation end and yesterday, capped at `max_backfill_days`
    /// (spec §4.3.2: "if `backfill-on-startup`, runs `backfill-missed-days`
    /// up to `max-backfill-days`").
    pub fn backfill_missed_days(&self, store: &SessionStore, today: NaiveDate) -> Result<Vec<ConsolidationSummary>> {
        let last_end = self.nidra.last_consolidation_end();
        let start_date = last_end
            .map(|d| d.date_naive().succ_opt().unwrap_or(d.date_naive()))
            .unwrap_or_else(|| today - chrono::Duration::days(self.max_backfill_days as i64));
        let mut summaries = Vec::new();
        let mut cursor = start_date;
        let mut days_run = 0u32;
        while cursor < today && days_run < self.max_backfill_days {
            if let Some(summary) = self.consolidate_date(store, cursor)? {
                summaries.push(summary);
            }
            cursor = cursor.succ_opt().unwrap_or(cursor);
            days_run += 1;
        }
        Ok(summaries)
    }

    /// Moves day files older than `retention_months` from `days/` to
    /// `archive/days/`; best-effort rename, falling back to copy+delete.
    pub fn archive_old_days(&self, today: NaiveDate) -> Result<usize> {
        let cutoff = today - chrono::Months::new(self.retention_months);
        let days_root = self.home.join("days");
        if !days_root.exists() {
            return Ok(0);
        }
        let mut archived = 0;
        for year_entry in fs::read_dir(&days_root)?.flatten() {
            if !year_entry.path().is_dir() {
                continue;
            }
            for month_entry in fs::read_dir(year_entry.path())?.flatten() {
                if !month_entry.path().is_dir() {
                    continue;
                }
                for day_entry in fs::read_dir(month_entry.path())?.flatten() {
                    let path = day_entry.path();
                    let Some(date) = path_to_date(&path) else { continue };
                    if date < cutoff {
                        let archive_path = archive_path_for(&self.home, date);
                        if let Some(parent) = archive_path.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        if fs::rename(&path, &archive_path).is_err() {
                            fs::copy(&path, &archive_path)?;
                            fs::remove_file(&path)?;
                        }
                        archived += 1;
                    }
                }
            }
        }
        Ok(archived)
    }
}

fn day_file_path(home: &Path, date: NaiveDate) -> PathBuf {
    home.join("days")
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}.md", date.day()))
}

fn archive_path_for(home: &Path, date: NaiveDate) -> PathBuf {
    home.join("archive")
        .join("days")
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}.md", date.day()))
}

fn path_to_date(path: &Path) -> Option<NaiveDate> {
    let day: u32 = path.file_stem()?.to_str()?.parse().ok()?;
    let month_dir = path.parent()?;
    let month: u32 = month_dir.file_name()?.to_str()?.parse().ok()?;
    let year_dir = month_dir.parent()?;
    let year: i32 = year_dir.file_name()?.to_str()?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Role, Turn};
    use tempfile::tempdir;

    fn nidra(home: &Path) -> (SessionStore, Arc<Nidra>) {
        let store = SessionStore::open(home).unwrap();
        let n = Arc::new(Nidra::restore(store.storage(), 300, 5).unwrap());
        (store, n)
    }

    #[test]
    fn consolidate_date_writes_day_file_and_facts() {
        let dir = tempdir().unwrap();
        let (store, n) = nidra(dir.path());
        let mut meta = store.create_session("/tmp/proj", "agent-a", "model-x", None, None).unwrap();
        let turn = Turn {
            session_id: meta.id.clone(),
            turn_number: 1,
            role: Role::Assistant,
            content: "authentication middleware authentication bug authentication fix".to_string(),
            tool_calls: vec![],
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        };
        store.add_turn(&mut meta, turn).unwrap();

        let chitragupta = Chitragupta::new(dir.path(), n, 12, 30);
        let today = Utc::now().date_naive();
        let summary = chitragupta.consolidate_date(&store, today).unwrap().unwrap();
        assert_eq!(summary.sessions_processed, 1);
        assert!(day_file_path(dir.path(), today).exists());
    }

    #[test]
    fn concurrent_consolidation_short_circuits() {
        let dir = tempdir().unwrap();
        let (store, n) = nidra(dir.path());
        let chitragupta = Chitragupta::new(dir.path(), n, 12, 30);
        chitragupta.running.store(true, Ordering::SeqCst);
        let today = Utc::now().date_naive();
        let result = chitragupta.consolidate_date(&store, today).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn archive_moves_day_files_past_retention() {
        let dir = tempdir().unwrap();
        let (store, n) = nidra(dir.path());
        let chitragupta = Chitragupta::new(dir.path(), n, 1, 30);
        let old_date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let path = day_file_path(dir.path(), old_date);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "# old day\n").unwrap();
        drop(store);

        let today = Utc::now().date_naive();
        let archived = chitragupta.archive_old_days(today).unwrap();
        assert_eq!(archived, 1);
        assert!(!path.exists());
        assert!(archive_path_for(dir.path(), old_date).exists());
    }
}
