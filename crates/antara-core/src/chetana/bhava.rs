//! Bhava: the affect subsystem (spec §4.4.1). Four scalars clamped to their
//! declared intervals after every mutation, each decaying exponentially
//! toward a neutral base per turn.

use serde::{Deserialize, Serialize};

const NEUTRAL_VALENCE: f64 = 0.0;
const NEUTRAL_AROUSAL: f64 = 0.2;
const NEUTRAL_CONFIDENCE: f64 = 0.6;
const NEUTRAL_FRUSTRATION: f64 = 0.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BhavaConfig {
    pub decay_rate: f64,
    pub frustration_per_error: f64,
    pub frustration_per_correction: f64,
    pub frustration_per_success: f64,
    pub frustration_alert_threshold: f64,
}

impl Default for BhavaConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.15,
            frustration_per_error: 0.12,
            frustration_per_correction: 0.2,
            frustration_per_success: 0.08,
            frustration_alert_threshold: 0.7,
        }
    }
}

/// The four affect scalars (spec §3.5). `valence` ranges `[-1, 1]`; the
/// rest range `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Affect {
    pub valence: f64,
    pub arousal: f64,
    pub confidence: f64,
    pub frustration: f64,
}

impl Default for Affect {
    fn default() -> Self {
        Self {
            valence: NEUTRAL_VALENCE,
            arousal: NEUTRAL_AROUSAL,
            confidence: NEUTRAL_CONFIDENCE,
            frustration: NEUTRAL_FRUSTRATION,
        }
    }
}

impl Affect {
    fn clamp(&mut self) {
        self.valence = self.valence.clamp(-1.0, 1.0);
        self.arousal = self.arousal.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.frustration = self.frustration.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bhava {
    config: BhavaConfig,
    affect: Affect,
    successes: u64,
    failures: u64,
}

impl Default for Bhava {
    fn default() -> Self {
        Self::new(BhavaConfig::default())
    }
}

impl Bhava {
    pub fn new(config: BhavaConfig) -> Self {
        Self {
            config,
            affect: Affect::default(),
            successes: 0,
            failures: 0,
        }
    }

    pub fn affect(&self) -> Affect {
        self.affect
    }

    /// Whether `on_tool_result` just pushed frustration past the alert
    /// threshold; the controller uses this to emit `chetana:frustrated`.
    pub fn is_frustrated(&self) -> bool {
        self.affect.frustration >= self.config.frustration_alert_threshold
    }

    pub fn on_tool_result(&mut self, is_error: bool, is_correction: bool) {
        if is_correction {
            self.affect.frustration += self.config.frustration_per_correction;
            self.failures += 1;
        } else if is_error {
            self.affect.frustration += self.config.frustration_per_error;
            self.failures += 1;
        } else {
            self.affect.frustration -= self.config.frustration_per_success;
            self.successes += 1;
        }
        self.affect.arousal += if is_error || is_correction { 0.15 } else { 0.05 };

        let total = self.successes + self.failures;
        if total > 0 {
            self.affect.valence = (self.successes as f64 - self.failures as f64) / total as f64;
        }
        self.affect.clamp();
    }

    pub fn decay_turn(&mut self) {
        self.affect.valence += self.config.decay_rate * (NEUTRAL_VALENCE - self.affect.valence);
        self.affect.arousal += self.config.decay_rate * (NEUTRAL_AROUSAL - self.affect.arousal);
        self.affect.frustration += self.config.decay_rate * (NEUTRAL_FRUSTRATION - self.affect.frustration);
        self.affect.clamp();
    }

    pub fn update_confidence(&mut self, rate: f64) {
        self.affect.confidence = rate.clamp(0.0, 1.0);
    }
}
