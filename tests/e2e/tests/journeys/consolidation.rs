//! End-to-end journey: sleep/consolidation survives a simulated process
//! restart and backfills a day that was missed while "the process was
//! down" (spec §4.3.1 crash-safe resumption, §4.3.2 backfill-on-startup).

use antara_core::nidra::Nidra;
use antara_core::store::{Role, Turn};
use antara_core::{Chitragupta, SessionStore};
use chrono::{Datelike, Duration, Utc};
use std::sync::Arc;
use tempfile::tempdir;

fn seed_assistant_turn(store: &SessionStore, project: &str, content: &str) {
    seed_assistant_turn_at(store, project, content, Utc::now());
}

fn seed_assistant_turn_at(store: &SessionStore, project: &str, content: &str, when: chrono::DateTime<Utc>) {
    let mut meta = store.create_session(project, "agent-a", "model-x", None, None).unwrap();
    let turn = Turn {
        session_id: meta.id.clone(),
        turn_number: 1,
        role: Role::User,
        content: "investigate the flaky test".to_string(),
        tool_calls: vec![],
        agent_id: None,
        model_id: None,
        created_at: when,
    };
    store.add_turn(&mut meta, turn).unwrap();
    let turn2 = Turn {
        session_id: meta.id.clone(),
        turn_number: 2,
        role: Role::Assistant,
        content: content.to_string(),
        tool_calls: vec![],
        agent_id: None,
        model_id: None,
        created_at: when,
    };
    store.add_turn(&mut meta, turn2).unwrap();
}

#[test]
fn consolidation_state_survives_a_simulated_restart() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();
    seed_assistant_turn(&store, "/tmp/proj", "fixed a race condition in the flaky test by adding a mutex");

    // First "process": consolidate today, then drop everything.
    {
        let nidra = Arc::new(Nidra::restore(store.storage(), 300, 5).unwrap());
        let chitragupta = Chitragupta::new(dir.path(), nidra, 12, 30);
        let today = Utc::now().date_naive();
        let summary = chitragupta.consolidate_date(&store, today).unwrap().unwrap();
        assert_eq!(summary.sessions_processed, 1);
    }

    // Second "process": restore from the persisted row and confirm the
    // consolidation window recorded by the first process is visible.
    let nidra_restarted = Nidra::restore(store.storage(), 300, 5).unwrap();
    assert!(nidra_restarted.last_consolidation_end().is_some());
}

#[test]
fn backfill_catches_up_a_day_missed_while_the_process_was_down() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();
    let yesterday = Utc::now() - Duration::days(1);
    seed_assistant_turn_at(
        &store,
        "/tmp/proj",
        "refactored the migration runner to be idempotent",
        yesterday,
    );

    let nidra = Arc::new(Nidra::restore(store.storage(), 300, 5).unwrap());
    let chitragupta = Chitragupta::new(dir.path(), nidra, 12, 30);

    // No consolidation has ever run (the process was never alive
    // yesterday); backfill should pick up yesterday without the caller
    // driving it explicitly. Note `backfill_missed_days` deliberately
    // excludes `today`, which is handled separately by the idle-triggered
    // dream pass.
    let today = Utc::now().date_naive();
    let summaries = chitragupta.backfill_missed_days(&store, today).unwrap();
    let yesterday_key = yesterday.date_naive().to_string();
    assert!(summaries.iter().any(|s| s.date == yesterday_key && s.sessions_processed > 0));
}

#[test]
fn archive_old_days_moves_files_past_retention_after_restart() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();
    let old_date = Utc::now().date_naive() - Duration::days(400);

    let nidra = Arc::new(Nidra::restore(store.storage(), 300, 5).unwrap());
    let chitragupta = Chitragupta::new(dir.path(), nidra, 1, 30);

    let day_dir = dir
        .path()
        .join("days")
        .join(format!("{:04}", old_date.year()))
        .join(format!("{:02}", old_date.month()));
    std::fs::create_dir_all(&day_dir).unwrap();
    std::fs::write(day_dir.join(format!("{:02}.md", old_date.day())), "# old day\n").unwrap();

    let today = Utc::now().date_naive();
    let archived = chitragupta.archive_old_days(today).unwrap();
    assert_eq!(archived, 1);
}
