//! Dhyana: the attention subsystem (spec §4.4.2). Three maps from
//! identifier to salience score: messages, concepts, tools. Concepts are
//! capped at 100 entries, evicting the lowest salience.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::util::{tokenize_keywords, DEFAULT_STOP_WORDS};

const MAX_CONCEPTS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DhyanaConfig {
    pub recency_decay: f64,
    pub focus_window: usize,
}

impl Default for DhyanaConfig {
    fn default() -> Self {
        Self {
            recency_decay: 0.1,
            focus_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dhyana {
    config: DhyanaConfig,
    /// Ordered oldest-first so rank-based recency decay can be applied by
    /// position; salience is the current (already-decayed) value.
    messages: Vec<(String, f64)>,
    concepts: HashMap<String, f64>,
    tools: HashMap<String, f64>,
}

impl Default for Dhyana {
    fn default() -> Self {
        Self::new(DhyanaConfig::default())
    }
}

impl Dhyana {
    pub fn new(config: DhyanaConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            concepts: HashMap::new(),
            tools: HashMap::new(),
        }
    }

    /// Adds a message at salience 1.0; boosts the previous message when
    /// this one is an error or a correction (spec: "boost neighbors of
    /// error messages; boost user corrections").
    pub fn add_message(&mut self, id: &str, is_error: bool, is_correction: bool) {
        if (is_error || is_correction) && !self.messages.is_empty() {
            let last = self.messages.len() - 1;
            self.messages[last].1 += 0.3;
        }
        self.messages.push((id.to_string(), 1.0));
        self.refresh_recency();
    }

    /// Applies rank-based recency decay: older positions shrink by
    /// `1 / (1 + rank * decay)` where rank 0 is the newest message.
    fn refresh_recency(&mut self) {
        let n = self.messages.len();
        for (rank_from_end, (_, salience)) in self.messages.iter_mut().rev().enumerate() {
            let _ = n;
            *salience /= 1.0 + rank_from_end as f64 * self.config.recency_decay;
        }
    }

    pub fn track_concepts(&mut self, text: &str) {
        for token in tokenize_keywords(text, 3, DEFAULT_STOP_WORDS) {
            *self.concepts.entry(token).or_insert(0.0) += 1.0;
        }
        while self.concepts.len() > MAX_CONCEPTS {
            if let Some((lowest, _)) = self
                .concepts
                .iter()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, v)| (k.clone(), *v))
            {
                self.concepts.remove(&lowest);
            } else {
                break;
            }
        }
    }

    pub fn on_tool_used(&mut self, tool: &str, success: bool, score: f64) {
        let base = 0.5;
        let weight = score.abs().max(0.1);
        let delta = if success { weight } else { -weight };
        let entry = self.tools.entry(tool.to_string()).or_insert(base);
        *entry = (*entry + delta).max(0.0);
    }

    pub fn top_concepts(&self, n: usize) -> Vec<(String, f64)> {
        let mut v: Vec<_> = self.concepts.iter().map(|(k, s)| (k.clone(), *s)).collect();
        v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        v.truncate(n);
        v
    }

    pub fn top_tools(&self, n: usize) -> Vec<(String, f64)> {
        let mut v: Vec<_> = self.tools.iter().map(|(k, s)| (k.clone(), *s)).collect();
        v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        v.truncate(n);
        v
    }

    /// Top `focus_window` message ids by current salience.
    pub fn focus_window(&self) -> Vec<String> {
        let mut v = self.messages.clone();
        v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        v.truncate(self.config.focus_window);
        v.into_iter().map(|(id, _)| id).collect()
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }
}
