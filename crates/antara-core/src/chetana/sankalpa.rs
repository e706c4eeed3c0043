//! Sankalpa: the intention subsystem (spec §4.4.4). Pattern-matches user
//! text against fixed intent verbs, dedups against active intentions by
//! keyword Jaccard overlap, tracks progress from tool-result evidence, and
//! ages out stale goals.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::{fnv1a_hex12, jaccard, tokenize_keywords, DEFAULT_STOP_WORDS};

const DEDUP_THRESHOLD: f64 = 0.5;
const KEYWORD_MATCH_THRESHOLD: usize = 2;
const PROGRESS_INCREMENT: f64 = 0.1;
const MAX_EVIDENCE_CEILING: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Active,
    Paused,
    Achieved,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intention {
    pub id: String,
    pub goal: String,
    pub priority: Priority,
    pub status: Status,
    pub progress: f64,
    pub evidence: Vec<String>,
    pub subgoals: Vec<String>,
    pub stale_turns: u32,
    pub mention_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_advanced_at: DateTime<Utc>,
    #[serde(skip)]
    advanced_this_turn: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SankalpaConfig {
    pub max_intentions: usize,
    pub max_evidence_per_intention: usize,
    pub goal_abandonment_threshold: u32,
}

impl Default for SankalpaConfig {
    fn default() -> Self {
        Self {
            max_intentions: 20,
            max_evidence_per_intention: 10,
            goal_abandonment_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sankalpa {
    config: SankalpaConfig,
    intentions: HashMap<String, Intention>,
    next_id: u64,
}

impl Default for Sankalpa {
    fn default() -> Self {
        Self::new(SankalpaConfig::default())
    }
}

const INTENT_VERBS: &[(&str, &str)] = &[
    ("implement ", "implement"),
    ("fix the ", "fix"),
    ("fix ", "fix"),
    ("let's ", "collaborate"),
    ("lets ", "collaborate"),
    ("i want to ", "want"),
    ("refactor ", "refactor"),
];

impl Sankalpa {
    pub fn new(config: SankalpaConfig) -> Self {
        Self {
            config,
            intentions: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn intentions(&self) -> impl Iterator<Item = &Intention> {
        self.intentions.values()
    }

    pub fn get(&self, id: &str) -> Option<&Intention> {
        self.intentions.get(id)
    }

    fn max_evidence(&self) -> usize {
        self.config.max_evidence_per_intention.min(MAX_EVIDENCE_CEILING)
    }

    /// Extracts zero or more goals from `text` (one per intent verb match,
    /// each further split on " and "), dedups against active intentions by
    /// keyword overlap, and returns the ids touched this call.
    pub fn extract_from_text(&mut self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut touched = Vec::new();
        for (verb, _label) in INTENT_VERBS {
            if let Some(pos) = lower.find(verb) {
                let rest = &text[pos + verb.len()..];
                let clause = rest.split(['.', '!', '?', '\n']).next().unwrap_or(rest).trim();
                if clause.is_empty() {
                    continue;
                }
                for sub_goal in clause.split(" and ") {
                    let sub_goal = sub_goal.trim();
                    if sub_goal.is_empty() {
                        continue;
                    }
                    touched.push(self.upsert_goal(sub_goal));
                }
            }
        }
        touched
    }

    fn upsert_goal(&mut self, goal: &str) -> String {
        let keywords: Vec<String> = tokenize_keywords(goal, 3, DEFAULT_STOP_WORDS);
        let fingerprint = fnv1a_hex12(&keywords.join(" "));

        let existing_id = self.intentions.values().find_map(|intention| {
            if intention.status != Status::Active && intention.status != Status::Paused {
                return None;
            }
            let other_keywords: Vec<String> = tokenize_keywords(&intention.goal, 3, DEFAULT_STOP_WORDS);
            let sim = jaccard(keywords.iter().map(String::as_str), other_keywords.iter().map(String::as_str));
            (sim >= DEDUP_THRESHOLD).then(|| intention.id.clone())
        });

        if let Some(id) = existing_id {
            let intention = self.intentions.get_mut(&id).expect("looked up by id");
            intention.mention_count += 1;
            if intention.status == Status::Paused {
                intention.status = Status::Active;
            }
            intention.priority = match intention.mention_count {
                n if n >= 5 => Priority::Critical,
                n if n >= 3 => Priority::High,
                _ => intention.priority,
            };
            return id;
        }

        let now = Utc::now();
        let id = format!("{}-{:06x}", fingerprint, self.next_id);
        self.next_id += 1;
        let subgoals: Vec<String> = goal.split(" and ").skip(1).map(|s| s.trim().to_string()).collect();
        self.intentions.insert(
            id.clone(),
            Intention {
                id: id.clone(),
                goal: goal.to_string(),
                priority: Priority::Normal,
                status: Status::Active,
                progress: 0.0,
                evidence: Vec::new(),
                subgoals,
                stale_turns: 0,
                mention_count: 1,
                created_at: now,
                last_advanced_at: now,
                advanced_this_turn: false,
            },
        );
        self.evict_if_over_capacity();
        id
    }

    /// Advances every active intention whose goal keywords overlap `text`
    /// by at least `KEYWORD_MATCH_THRESHOLD` distinct hits.
    pub fn on_tool_result(&mut self, _tool: &str, text: &str) {
        let observed: Vec<String> = tokenize_keywords(text, 3, DEFAULT_STOP_WORDS);
        let max_evidence = self.max_evidence();
        for intention in self.intentions.values_mut() {
            if intention.status != Status::Active {
                continue;
            }
            let goal_keywords: Vec<String> = tokenize_keywords(&intention.goal, 3, DEFAULT_STOP_WORDS);
            let hits = goal_keywords.iter().filter(|k| observed.contains(k)).count();
            if hits >= KEYWORD_MATCH_THRESHOLD {
                intention.progress = (intention.progress + PROGRESS_INCREMENT).min(1.0);
                intention.evidence.push(text.chars().take(200).collect());
                if intention.evidence.len() > max_evidence {
                    intention.evidence.remove(0);
                }
                intention.stale_turns = 0;
                intention.last_advanced_at = Utc::now();
                intention.advanced_this_turn = true;
            }
        }
    }

    /// Ages every active intention that didn't advance this turn; pauses
    /// or abandons per the configured threshold (spec §4.4.4).
    pub fn end_turn(&mut self) {
        let threshold = self.config.goal_abandonment_threshold;
        for intention in self.intentions.values_mut() {
            if intention.status != Status::Active && intention.status != Status::Paused {
                intention.advanced_this_turn = false;
                continue;
            }
            if intention.advanced_this_turn {
                intention.advanced_this_turn = false;
                continue;
            }
            intention.stale_turns += 1;
            if intention.stale_turns >= threshold * 2 {
                intention.status = Status::Abandoned;
            } else if intention.stale_turns >= threshold {
                intention.status = Status::Paused;
            }
        }
    }

    pub fn achieve(&mut self, id: &str) -> bool {
        if let Some(intention) = self.intentions.get_mut(id) {
            intention.status = Status::Achieved;
            intention.progress = 1.0;
            true
        } else {
            false
        }
    }

    fn evict_if_over_capacity(&mut self) {
        while self.intentions.len() > self.config.max_intentions {
            let victim = self
                .intentions
                .values()
                .min_by(|a, b| eviction_key(a).cmp(&eviction_key(b)))
                .map(|i| i.id.clone());
            if let Some(id) = victim {
                self.intentions.remove(&id);
            } else {
                break;
            }
        }
    }
}

fn status_rank(status: Status) -> u8 {
    match status {
        Status::Abandoned => 0,
        Status::Paused => 1,
        Status::Achieved => 2,
        Status::Active => 3,
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

/// Lower sorts first (most evictable): `abandoned > paused > achieved` in
/// eviction priority per spec, then lowest priority, then oldest
/// `last_advanced_at`.
fn eviction_key(intention: &Intention) -> (u8, u8, i64) {
    (
        status_rank(intention.status),
        priority_rank(intention.priority),
        intention.last_advanced_at.timestamp(),
    )
}
