//! Autonomous policy layer wrapping the server registry: health scoring,
//! circuit breaking, quarantine, and target selection among servers that
//! provide the same capability (spec §4.7.2). Never touches per-call
//! transport directly.

use super::circuit::{CircuitBreaker, CircuitState, Quarantine};
use super::{ManagedServerInfo, ServerState};

const UPTIME_WEIGHT: f64 = 0.4;
const SUCCESS_WEIGHT: f64 = 0.3;
const LATENCY_WEIGHT: f64 = 0.3;
const UPTIME_SATURATION_HOURS: f64 = 24.0;
/// Candidates within this margin of the leading health score are treated
/// as tied and round-robined among.
const TIE_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthScore(pub f64);

impl HealthScore {
    pub fn compute(server: &ManagedServerInfo) -> Self {
        let uptime_hours = server.uptime().num_seconds() as f64 / 3600.0;
        let uptime_score = (uptime_hours / UPTIME_SATURATION_HOURS).min(1.0);
        let success_rate = server.stats.success_rate();
        let latency_score = 1.0 / (1.0 + server.stats.average_latency_ms / 1000.0);

        let score = UPTIME_WEIGHT * uptime_score + SUCCESS_WEIGHT * success_rate + LATENCY_WEIGHT * latency_score;
        HealthScore(score.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    Server(String),
    /// No eligible server: all candidates are quarantined or circuit-open.
    NoneAvailable,
}

/// Wraps circuit breaker and quarantine bookkeeping for every server the
/// registry knows about, and layers health-score-based selection on top.
pub struct AutonomousManager {
    circuit: CircuitBreaker,
    quarantine: Quarantine,
}

impl AutonomousManager {
    pub fn new(
        circuit_window_secs: u64,
        circuit_failure_threshold: usize,
        circuit_cooldown_secs: u64,
        quarantine_max_crashes: usize,
        quarantine_crash_window_secs: u64,
        quarantine_duration_secs: u64,
    ) -> Self {
        Self {
            circuit: CircuitBreaker::new(circuit_window_secs, circuit_failure_threshold, circuit_cooldown_secs),
            quarantine: Quarantine::new(quarantine_max_crashes, quarantine_crash_window_secs, quarantine_duration_secs),
        }
    }

    pub fn record_call_result(&mut self, server_id: &str, success: bool) {
        if success {
            self.circuit.record_success(server_id);
        } else {
            self.circuit.record_failure(server_id);
        }
    }

    pub fn record_health_failure(&mut self, server_id: &str) {
        self.circuit.record_failure(server_id);
    }

    /// A server transitioned to `error`; feed the quarantine tracker.
    /// Returns `true` if this crash newly quarantined the server.
    pub fn record_crash(&mut self, server_id: &str) -> bool {
        self.quarantine.record_crash(server_id)
    }

    pub fn release_quarantine(&mut self, server_id: &str) {
        self.quarantine.release(server_id);
    }

    pub fn is_quarantined(&mut self, server_id: &str) -> bool {
        self.quarantine.is_quarantined(server_id)
    }

    pub fn circuit_state(&mut self, server_id: &str) -> CircuitState {
        self.circuit.state(server_id)
    }

    /// Selects a server among `candidates` providing the same capability.
    /// Filters out quarantined and open-circuit servers; prefers a
    /// half-open candidate as a probe; otherwise picks by health score,
    /// round-robining among near-leaders using `tie_breaker` (typically a
    /// monotonically increasing call counter, per spec `now mod n`).
    pub fn select_target(&mut self, candidates: &[ManagedServerInfo], tie_breaker: u64) -> TargetSelection {
        let mut eligible: Vec<&ManagedServerInfo> = Vec::new();
        let mut half_open: Option<&ManagedServerInfo> = None;

        for server in candidates {
            if server.state != ServerState::Ready {
                continue;
            }
            if self.quarantine.is_quarantined(&server.id) {
                continue;
            }
            match self.circuit.state(&server.id) {
                CircuitState::Open => continue,
                CircuitState::HalfOpen => {
                    if half_open.is_none() {
                        half_open = Some(server);
                    }
                }
                CircuitState::Closed => {}
            }
            eligible.push(server);
        }

        if let Some(server) = half_open {
            return TargetSelection::Server(server.id.clone());
        }
        if eligible.is_empty() {
            return TargetSelection::NoneAvailable;
        }

        let mut scored: Vec<(f64, &ManagedServerInfo)> =
            eligible.iter().map(|s| (HealthScore::compute(s).0, *s)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let leader_score = scored[0].0;
        let near_leaders: Vec<&ManagedServerInfo> =
            scored.iter().filter(|(score, _)| leader_score - score <= TIE_MARGIN).map(|(_, s)| *s).collect();

        let index = (tie_breaker as usize) % near_leaders.len();
        TargetSelection::Server(near_leaders[index].id.clone())
    }
}
