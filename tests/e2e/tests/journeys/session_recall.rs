//! End-to-end journey: record conversations across two unrelated topics,
//! then confirm recall surfaces the right one and discards in-memory
//! caches cleanly on reload (spec §8 scenario 1, §4.2).

use antara_core::recall::RecallOptions;
use antara_e2e_tests::harness::TestWorld;
use antara_e2e_tests::mocks;

#[test]
fn consecutive_turns_replay_identically_after_reload() {
    let world = TestWorld::new();
    let session_id = world.seed_session("/tmp/project", "agent-a", "model-x", &["hi", "hello"]);

    // Discard in-memory caches by opening a brand new store over the same
    // home directory and reading back from Markdown.
    let reopened = antara_core::SessionStore::open(world.home()).unwrap();
    let loaded = reopened.load_session("/tmp/project", &session_id).unwrap();

    assert_eq!(loaded.turns.len(), 2);
    assert_eq!(loaded.turns[0].turn_number, 1);
    assert_eq!(loaded.turns[0].content, "hi");
    assert_eq!(loaded.turns[1].turn_number, 2);
    assert_eq!(loaded.turns[1].content, "hello");
}

#[test]
fn hybrid_recall_distinguishes_unrelated_conversations() {
    let world = TestWorld::new();
    let auth_session = world.seed_session("/tmp/project", "agent-a", "model-x", &mocks::auth_bugfix_turns());
    let _migration_session =
        world.seed_session("/tmp/project", "agent-a", "model-x", &mocks::database_migration_turns());

    let results = world
        .recall
        .recall(
            world.store.storage(),
            &world.store,
            "expired token refresh guard",
            &RecallOptions::default(),
        )
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].source_id, auth_session);
}

#[test]
fn gated_recall_skips_trivial_queries_but_opens_for_real_ones() {
    let world = TestWorld::new();
    world.seed_session("/tmp/project", "agent-a", "model-x", &mocks::auth_bugfix_turns());

    let trivial = world
        .recall
        .gated_recall(world.store.storage(), &world.store, "ok", &[], &RecallOptions::default())
        .unwrap();
    assert!(trivial.is_none());

    let real = world
        .recall
        .gated_recall(
            world.store.storage(),
            &world.store,
            "why did the login endpoint start returning 500s?",
            &[],
            &RecallOptions::default(),
        )
        .unwrap();
    assert!(real.is_some());
}

#[test]
fn reindex_all_is_deterministic_across_two_runs() {
    let world = TestWorld::new();
    world.seed_session("/tmp/project", "agent-a", "model-x", &mocks::auth_bugfix_turns());

    let first = world.recall.reindex_all(world.store.storage()).unwrap();
    let second = world.recall.reindex_all(world.store.storage()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn branch_session_carries_parent_and_starts_with_no_turns() {
    let world = TestWorld::new();
    let source = world
        .store
        .create_session("/tmp/project", "agent-a", "model-x", None, Some("original"))
        .unwrap();
    let branch = world.store.branch_session(&source, "/tmp/project", Some("experiment")).unwrap();

    assert_eq!(branch.parent_session_id, Some(source.id));
    assert_eq!(branch.turn_count, 0);
}
