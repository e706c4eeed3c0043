//! End-to-end journey over the remote-capability registry and autonomous
//! manager: lifecycle transitions, health-driven circuit breaking, crash
//! quarantine, and health-score-based target selection among equivalent
//! servers (spec §4.7, §8 scenario 3).

use antara_core::capability::{CircuitState, TargetSelection};
use antara_core::{AutonomousManager, ServerRegistry, ServerState};

#[test]
fn server_lifecycle_then_health_failures_open_the_circuit() {
    let mut registry = ServerRegistry::new();
    registry.add("search-mcp").unwrap();
    registry.transition("search-mcp", ServerState::Starting).unwrap();
    registry.transition("search-mcp", ServerState::Ready).unwrap();

    let mut manager = AutonomousManager::new(60, 5, 30, 3, 300, 600);
    assert_eq!(manager.circuit_state("search-mcp"), CircuitState::Closed);

    for _ in 0..5 {
        registry.record_call("search-mcp", false, 10.0).unwrap();
        manager.record_call_result("search-mcp", false);
    }

    assert_eq!(manager.circuit_state("search-mcp"), CircuitState::Open);
    let server = registry.get("search-mcp").unwrap();
    assert!(server.stats.total_errors >= 5);
}

#[test]
fn illegal_lifecycle_transition_is_rejected() {
    let mut registry = ServerRegistry::new();
    registry.add("flaky-mcp").unwrap();
    // idle -> ready directly is illegal; must pass through starting first.
    let err = registry.transition("flaky-mcp", ServerState::Ready);
    assert!(err.is_err());
}

#[test]
fn repeated_crashes_quarantine_a_server_and_manual_release_restores_it() {
    let mut registry = ServerRegistry::new();
    registry.add("unstable-mcp").unwrap();
    let mut manager = AutonomousManager::new(60, 5, 30, 3, 300, 600);

    for _ in 0..3 {
        registry.transition("unstable-mcp", ServerState::Starting).unwrap();
        registry.transition("unstable-mcp", ServerState::Ready).unwrap();
        registry.transition("unstable-mcp", ServerState::Error).unwrap();
        manager.record_crash("unstable-mcp");
        registry.transition("unstable-mcp", ServerState::Stopping).unwrap();
        registry.transition("unstable-mcp", ServerState::Stopped).unwrap();
        registry.transition("unstable-mcp", ServerState::Idle).unwrap();
    }

    assert!(manager.is_quarantined("unstable-mcp"));
    manager.release_quarantine("unstable-mcp");
    assert!(!manager.is_quarantined("unstable-mcp"));
}

#[test]
fn target_selection_prefers_the_healthier_of_two_equivalent_servers() {
    let mut registry = ServerRegistry::new();
    for id in ["fast-mcp", "slow-mcp"] {
        registry.add(id).unwrap();
        registry.transition(id, ServerState::Starting).unwrap();
        registry.transition(id, ServerState::Ready).unwrap();
    }
    for _ in 0..50 {
        registry.record_call("fast-mcp", true, 5.0).unwrap();
        registry.record_call("slow-mcp", true, 4000.0).unwrap();
    }

    let mut manager = AutonomousManager::new(60, 5, 30, 3, 300, 600);
    let candidates = vec![
        registry.get("fast-mcp").unwrap().clone(),
        registry.get("slow-mcp").unwrap().clone(),
    ];
    let selection = manager.select_target(&candidates, 0);
    assert_eq!(selection, TargetSelection::Server("fast-mcp".to_string()));
}
