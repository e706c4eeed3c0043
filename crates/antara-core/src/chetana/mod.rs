//! Chetana: the cognitive state engine (spec §4.4). Four coupled
//! subsystems -- affect (Bhava), attention (Dhyana), self-model
//! (Atma-Darshana), intention (Sankalpa) -- wired together by a
//! single-threaded controller that runs synchronously around each turn.

mod atma;
mod bhava;
mod dhyana;
mod sankalpa;

pub use atma::{Atma, AtmaConfig, StyleFingerprint, ToolMastery, Trend};
pub use bhava::{Affect, Bhava, BhavaConfig};
pub use dhyana::{Dhyana, DhyanaConfig};
pub use sankalpa::{Intention, Priority, Sankalpa, SankalpaConfig, Status};

use serde::{Deserialize, Serialize};

const STEERING_CALIBRATION_THRESHOLD: f64 = 1.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChetanaConfig {
    pub bhava: BhavaConfig,
    pub dhyana: DhyanaConfig,
    pub atma: AtmaConfig,
    pub sankalpa: SankalpaConfig,
    pub max_steering_suggestions: usize,
}

impl Default for ChetanaConfig {
    fn default() -> Self {
        Self {
            bhava: BhavaConfig::default(),
            dhyana: DhyanaConfig::default(),
            atma: AtmaConfig::default(),
            sankalpa: SankalpaConfig::default(),
            max_steering_suggestions: 3,
        }
    }
}

/// Side-effecting notifications the controller can emit; the daemon shell
/// decides how (or whether) to surface these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChetanaEvent {
    Frustrated,
    GoalChanged { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attention {
    pub top_concepts: Vec<(String, f64)>,
    pub top_tools: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChetanaContext {
    pub affect: Affect,
    pub attention: Attention,
    pub self_assessment: String,
    pub active_intentions: Vec<Intention>,
    pub steering_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChetanaController {
    config: ChetanaConfig,
    bhava: Bhava,
    dhyana: Dhyana,
    atma: Atma,
    sankalpa: Sankalpa,
    message_seq: u64,
}

impl Default for ChetanaController {
    fn default() -> Self {
        Self::new(ChetanaConfig::default())
    }
}

impl ChetanaController {
    pub fn new(config: ChetanaConfig) -> Self {
        Self {
            bhava: Bhava::new(config.bhava),
            dhyana: Dhyana::new(config.dhyana),
            atma: Atma::new(config.atma.clone()),
            sankalpa: Sankalpa::new(config.sankalpa),
            config,
            message_seq: 0,
        }
    }

    pub fn bhava(&self) -> &Bhava {
        &self.bhava
    }

    pub fn dhyana(&self) -> &Dhyana {
        &self.dhyana
    }

    pub fn atma(&self) -> &Atma {
        &self.atma
    }

    pub fn sankalpa(&self) -> &Sankalpa {
        &self.sankalpa
    }

    pub fn before_turn(&mut self, user_msg: &str, is_error: bool, is_correction: bool) -> ChetanaContext {
        self.message_seq += 1;
        let message_id = format!("m{}", self.message_seq);
        self.dhyana.add_message(&message_id, is_error, is_correction);
        self.dhyana.track_concepts(user_msg);
        self.sankalpa.extract_from_text(user_msg);

        let attention = Attention {
            top_concepts: self.dhyana.top_concepts(5),
            top_tools: self.dhyana.top_tools(5),
        };
        let mut active_intentions: Vec<Intention> = self
            .sankalpa
            .intentions()
            .filter(|i| i.status == Status::Active)
            .cloned()
            .collect();
        active_intentions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.mention_count.cmp(&a.mention_count))
        });
        active_intentions.truncate(5);

        ChetanaContext {
            affect: self.bhava.affect(),
            attention,
            self_assessment: self.atma.summary(),
            active_intentions,
            steering_suggestions: self.steering_suggestions(),
        }
    }

    pub fn after_tool_execution(
        &mut self,
        tool: &str,
        success: bool,
        latency_ms: f64,
        result_text: &str,
        predicted_success_rate: Option<f64>,
    ) -> Vec<ChetanaEvent> {
        let was_frustrated = self.bhava.is_frustrated();
        self.bhava.on_tool_result(!success, false);
        self.dhyana.on_tool_used(tool, success, 1.0);
        self.atma.record_tool_result(tool, success, latency_ms, predicted_success_rate);
        self.sankalpa.on_tool_result(tool, result_text);

        let mut events = Vec::new();
        if self.bhava.is_frustrated() && !was_frustrated {
            events.push(ChetanaEvent::Frustrated);
        }
        events
    }

    pub fn after_turn(&mut self) {
        self.bhava.decay_turn();
        self.atma.advance_turn();
        self.sankalpa.end_turn();
    }

    pub fn achieve(&mut self, id: &str) -> Option<ChetanaEvent> {
        if self.sankalpa.achieve(id) {
            Some(ChetanaEvent::GoalChanged { id: id.to_string() })
        } else {
            None
        }
    }

    fn steering_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        if self.bhava.is_frustrated() {
            suggestions.push("frustration is elevated; consider a simpler, more incremental approach".to_string());
        }
        let stale_threshold = self.config.sankalpa.goal_abandonment_threshold / 2;
        for intention in self.sankalpa.intentions().filter(|i| i.status == Status::Active) {
            if intention.stale_turns > stale_threshold {
                suggestions.push(format!("refocus on: {}", intention.goal));
            }
        }
        if self.atma.calibration() > STEERING_CALIBRATION_THRESHOLD {
            suggestions.push("confidence has been overstated recently; verify before proceeding".to_string());
        }
        suggestions.truncate(self.config.max_steering_suggestions);
        suggestions
    }
}
