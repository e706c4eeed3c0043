//! Atma-Darshana: the self-model subsystem (spec §4.4.3). Per-tool mastery
//! records with Wilson-CI-bounded success rate, trend detection, a
//! calibration ratio, learning velocity, a style fingerprint, and a bounded
//! list of known limitations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::util::{wilson_interval, RingBuffer};

const TREND_LOOKBACK: usize = 5;
const TREND_THRESHOLD: f64 = 0.05;
const FAILURE_STREAK_LIMIT: u32 = 3;
const CALIBRATION_WINDOW: usize = 20;
const RECOVERY_WINDOW: usize = 20;
const WILSON_Z: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMastery {
    pub tool: String,
    pub successes: u64,
    pub total_invocations: u64,
    pub success_rate: f64,
    pub wilson_lower: f64,
    pub wilson_upper: f64,
    pub trend: Trend,
    pub avg_latency_ms: f64,
    rate_history: RingBuffer<f64>,
    failure_streak: u32,
    error_turn: Option<u64>,
}

impl ToolMastery {
    fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            successes: 0,
            total_invocations: 0,
            success_rate: 0.0,
            wilson_lower: 0.0,
            wilson_upper: 1.0,
            trend: Trend::Stable,
            avg_latency_ms: 0.0,
            rate_history: RingBuffer::new(64),
            failure_streak: 0,
            error_turn: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleFingerprint {
    pub exploration_vs_exploitation: f64,
    pub tool_density: f64,
    pub error_recovery_speed: f64,
}

impl Default for StyleFingerprint {
    fn default() -> Self {
        Self {
            exploration_vs_exploitation: 0.0,
            tool_density: 0.0,
            error_recovery_speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmaConfig {
    pub max_limitations: usize,
}

impl Default for AtmaConfig {
    fn default() -> Self {
        Self { max_limitations: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atma {
    config: AtmaConfig,
    tools: HashMap<String, ToolMastery>,
    limitations: Vec<String>,
    calibration_samples: RingBuffer<(f64, f64)>,
    recovery_turns: RingBuffer<u64>,
    current_turn: u64,
    total_calls_this_session: u64,
    tool_calls_this_turn: u64,
    turn_count: u64,
}

impl Default for Atma {
    fn default() -> Self {
        Self::new(AtmaConfig::default())
    }
}

impl Atma {
    pub fn new(config: AtmaConfig) -> Self {
        Self {
            config,
            tools: HashMap::new(),
            limitations: Vec::new(),
            calibration_samples: RingBuffer::new(CALIBRATION_WINDOW),
            recovery_turns: RingBuffer::new(RECOVERY_WINDOW),
            current_turn: 0,
            total_calls_this_session: 0,
            tool_calls_this_turn: 0,
            turn_count: 0,
        }
    }

    pub fn advance_turn(&mut self) {
        self.current_turn += 1;
        self.turn_count += 1;
        self.tool_calls_this_turn = 0;
    }

    pub fn mastery(&self, tool: &str) -> Option<&ToolMastery> {
        self.tools.get(tool)
    }

    pub fn limitations(&self) -> &[String] {
        &self.limitations
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_result(
        &mut self,
        tool: &str,
        success: bool,
        latency_ms: f64,
        predicted_success_rate: Option<f64>,
    ) {
        self.total_calls_this_session += 1;
        self.tool_calls_this_turn += 1;

        let was_failing = self.tools.get(tool).map(|m| m.failure_streak > 0).unwrap_or(false);
        let error_turn = self.tools.get(tool).and_then(|m| m.error_turn);

        let mastery = self.tools.entry(tool.to_string()).or_insert_with(|| ToolMastery::new(tool));
        mastery.total_invocations += 1;
        if success {
            mastery.successes += 1;
        }
        mastery.success_rate = mastery.successes as f64 / mastery.total_invocations as f64;
        let (lo, hi) = wilson_interval(mastery.successes, mastery.total_invocations, WILSON_Z);
        mastery.wilson_lower = lo;
        mastery.wilson_upper = hi;
        let n = mastery.total_invocations as f64;
        mastery.avg_latency_ms = mastery.avg_latency_ms + (latency_ms - mastery.avg_latency_ms) / n;

        mastery.rate_history.push(mastery.success_rate);
        mastery.trend = compute_trend(&mastery.rate_history);

        if success {
            mastery.failure_streak = 0;
            if was_failing {
                if let Some(error_turn) = error_turn {
                    self.recovery_turns.push(self.current_turn.saturating_sub(error_turn));
                }
            }
            mastery.error_turn = None;
        } else {
            mastery.failure_streak += 1;
            if mastery.error_turn.is_none() {
                mastery.error_turn = Some(self.current_turn);
            }
            if mastery.failure_streak >= FAILURE_STREAK_LIMIT {
                let limitation = format!("Tool {tool}: {} consecutive failures", mastery.failure_streak);
                if !self.limitations.contains(&limitation) {
                    self.limitations.push(limitation);
                    if self.limitations.len() > self.config.max_limitations {
                        self.limitations.remove(0);
                    }
                }
            }
        }

        if let Some(predicted) = predicted_success_rate {
            let actual = if success { 1.0 } else { 0.0 };
            self.calibration_samples.push((predicted, actual));
        }
    }

    pub fn calibration(&self) -> f64 {
        if self.calibration_samples.is_empty() {
            return 1.0;
        }
        let (sum_p, sum_a) = self
            .calibration_samples
            .iter()
            .fold((0.0, 0.0), |(sp, sa), (p, a)| (sp + p, sa + a));
        if sum_a == 0.0 {
            1.0
        } else {
            sum_p / sum_a
        }
    }

    /// Mean over tools of `(current_rate - rate_at_lookback)`, 0 if no tool
    /// has enough history.
    pub fn learning_velocity(&self) -> f64 {
        let deltas: Vec<f64> = self
            .tools
            .values()
            .filter(|m| m.rate_history.len() >= TREND_LOOKBACK)
            .map(|m| {
                let current = *m.rate_history.back().unwrap_or(&0.0);
                let lookback = lookback_rate(&m.rate_history);
                current - lookback
            })
            .collect();
        if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        }
    }

    pub fn style_fingerprint(&self) -> StyleFingerprint {
        let unique_tools = self.tools.len() as f64;
        let total_calls = self.total_calls_this_session.max(1) as f64;
        let error_recovery_speed = if self.recovery_turns.is_empty() {
            1.0
        } else {
            let mean: f64 =
                self.recovery_turns.iter().sum::<u64>() as f64 / self.recovery_turns.len() as f64;
            if mean > 0.0 {
                1.0 / mean
            } else {
                1.0
            }
        };
        StyleFingerprint {
            exploration_vs_exploitation: unique_tools / total_calls,
            tool_density: total_calls / self.turn_count.max(1) as f64,
            error_recovery_speed,
        }
    }

    pub fn summary(&self) -> String {
        let mut tools: Vec<&ToolMastery> = self.tools.values().collect();
        tools.sort_by(|a, b| b.total_invocations.cmp(&a.total_invocations));
        let top: Vec<String> = tools
            .iter()
            .take(3)
            .map(|m| format!("{} ({:.0}% over {})", m.tool, m.success_rate * 100.0, m.total_invocations))
            .collect();
        if top.is_empty() {
            "no tool usage recorded yet".to_string()
        } else {
            format!("strongest tools: {}", top.join(", "))
        }
    }
}

fn lookback_rate(history: &RingBuffer<f64>) -> f64 {
    let items: Vec<f64> = history.iter().copied().collect();
    let idx = items.len().saturating_sub(TREND_LOOKBACK);
    items.get(idx).copied().unwrap_or(0.0)
}

fn compute_trend(history: &RingBuffer<f64>) -> Trend {
    if history.len() < TREND_LOOKBACK {
        return Trend::Stable;
    }
    let current = *history.back().unwrap_or(&0.0);
    let lookback = lookback_rate(history);
    let delta = current - lookback;
    if delta >= TREND_THRESHOLD {
        Trend::Improving
    } else if delta <= -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wilson_ci_always_in_unit_interval() {
        let mut atma = Atma::default();
        for i in 0..20 {
            atma.record_tool_result("grep", i % 3 != 0, 10.0, None);
        }
        let m = atma.mastery("grep").unwrap();
        assert!((0.0..=1.0).contains(&m.wilson_lower));
        assert!((0.0..=1.0).contains(&m.wilson_upper));
        assert!(m.wilson_lower <= m.wilson_upper);
    }

    #[test]
    fn failure_streak_adds_limitation_at_threshold() {
        let mut atma = Atma::default();
        atma.record_tool_result("flaky", false, 5.0, None);
        atma.record_tool_result("flaky", false, 5.0, None);
        assert!(atma.limitations().is_empty());
        atma.record_tool_result("flaky", false, 5.0, None);
        assert_eq!(atma.limitations().len(), 1);
        assert!(atma.limitations()[0].contains("flaky"));
    }

    #[test]
    fn success_after_failure_resets_streak_and_records_recovery() {
        let mut atma = Atma::default();
        atma.advance_turn();
        atma.record_tool_result("flaky", false, 5.0, None);
        atma.advance_turn();
        atma.advance_turn();
        atma.record_tool_result("flaky", true, 5.0, None);
        let m = atma.mastery("flaky").unwrap();
        assert_eq!(m.failure_streak, 0);
    }

    #[test]
    fn calibration_defaults_to_one_with_no_samples() {
        let atma = Atma::default();
        assert_eq!(atma.calibration(), 1.0);
    }

    #[test]
    fn calibration_reflects_overconfidence() {
        let mut atma = Atma::default();
        for _ in 0..5 {
            atma.record_tool_result("t", false, 1.0, Some(0.9));
        }
        assert!(atma.calibration() > 1.0);
    }

    #[test]
    fn trend_improving_when_recent_rate_rises() {
        let mut atma = Atma::default();
        for _ in 0..5 {
            atma.record_tool_result("t", false, 1.0, None);
        }
        for _ in 0..10 {
            atma.record_tool_result("t", true, 1.0, None);
        }
        let m = atma.mastery("t").unwrap();
        assert_eq!(m.trend, Trend::Improving);
    }
}
