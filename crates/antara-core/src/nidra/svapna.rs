//! Svapna: the five-phase per-project pattern-crystallization pipeline run
//! by Chitragupta once a day's sessions have been written (spec §4.3.2 step
//! 2, glossary "Svapna"). Grounded on the teacher's four-phase dream cycle
//! (`consolidation/phases.rs`'s `Nrem1 -> Nrem3 -> Rem -> Integration`
//! triage/replay/associate/integrate shape), extended with a fifth
//! `Crystallize` phase that turns the cycle's insights into the fact
//! strings Chitragupta persists into global memory.

use std::collections::HashMap;

use crate::store::{Role, Turn};
use crate::util::{tokenize_keywords, DEFAULT_STOP_WORDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvapnaPhase {
    /// Classify turns into error/correction/routine buckets.
    Triage,
    /// Re-weight concept salience by how often it recurs across turns.
    Replay,
    /// Link co-occurring concepts into a small association graph.
    Associate,
    /// Synthesize a short free-text insight from the strongest associations.
    Integrate,
    /// Emit the date-prefixed fact strings to persist into global memory.
    Crystallize,
}

impl SvapnaPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SvapnaPhase::Triage => "triage",
            SvapnaPhase::Replay => "replay",
            SvapnaPhase::Associate => "associate",
            SvapnaPhase::Integrate => "integrate",
            SvapnaPhase::Crystallize => "crystallize",
        }
    }
}

const ORDER: [SvapnaPhase; 5] = [
    SvapnaPhase::Triage,
    SvapnaPhase::Replay,
    SvapnaPhase::Associate,
    SvapnaPhase::Integrate,
    SvapnaPhase::Crystallize,
];

#[derive(Debug, Clone)]
pub struct SvapnaProgress {
    pub phase: SvapnaPhase,
    pub pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SvapnaReport {
    pub turns_processed: usize,
    pub error_turns: usize,
    pub top_concepts: Vec<(String, u32)>,
    pub connections: Vec<(String, String, u32)>,
    pub insights: Vec<String>,
    /// Fact strings ready to be prefixed with `[<ISO-date>] ` and appended
    /// to global memory by the caller.
    pub facts: Vec<String>,
}

/// Runs the five-phase pipeline over one project's turns for one day,
/// reporting `(phase, pct)` through `on_progress` as each phase finishes
/// (event name `svapna:<phase>` is the caller's responsibility to format).
pub fn run_svapna(turns: &[Turn], mut on_progress: impl FnMut(SvapnaProgress)) -> SvapnaReport {
    let total_phases = ORDER.len() as f64;
    let emit = |idx: usize, on_progress: &mut dyn FnMut(SvapnaProgress)| {
        on_progress(SvapnaProgress {
            phase: ORDER[idx],
            pct: (idx as f64 + 1.0) / total_phases,
        });
    };

    // Phase 1: Triage
    let error_turns = turns.iter().filter(|t| t.tool_calls.iter().any(|tc| tc.is_error)).count();
    emit(0, &mut on_progress);

    // Phase 2: Replay -- concept frequency across all turn content.
    let mut concept_counts: HashMap<String, u32> = HashMap::new();
    for turn in turns {
        for token in tokenize_keywords(&turn.content, 3, DEFAULT_STOP_WORDS) {
            *concept_counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut top_concepts: Vec<(String, u32)> = concept_counts.into_iter().collect();
    top_concepts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_concepts.truncate(10);
    emit(1, &mut on_progress);

    // Phase 3: Associate -- co-occurrence between the top concepts within
    // the same turn becomes a weighted edge.
    let top_set: std::collections::HashSet<&str> = top_concepts.iter().map(|(c, _)| c.as_str()).collect();
    let mut edge_counts: HashMap<(String, String), u32> = HashMap::new();
    for turn in turns {
        let present: std::collections::BTreeSet<String> = tokenize_keywords(&turn.content, 3, DEFAULT_STOP_WORDS)
            .into_iter()
            .filter(|t| top_set.contains(t.as_str()))
            .collect();
        let present: Vec<&String> = present.iter().collect();
        for i in 0..present.len() {
            for j in (i + 1)..present.len() {
                edge_counts
                    .entry((present[i].clone(), present[j].clone()))
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
            }
        }
    }
    let mut connections: Vec<(String, String, u32)> =
        edge_counts.into_iter().map(|((a, b), w)| (a, b, w)).collect();
    connections.sort_by(|a, b| b.2.cmp(&a.2));
    connections.truncate(10);
    emit(2, &mut on_progress);

    // Phase 4: Integrate -- one free-text insight per strong connection.
    let insights: Vec<String> = connections
        .iter()
        .filter(|(_, _, w)| *w >= 2)
        .map(|(a, b, w)| format!("\"{a}\" and \"{b}\" recur together ({w} turns this day)"))
        .collect();
    emit(3, &mut on_progress);

    // Phase 5: Crystallize -- turn insights (and a day summary) into facts.
    let mut facts = insights.clone();
    if !top_concepts.is_empty() {
        let headline = top_concepts
            .iter()
            .take(3)
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        facts.push(format!(
            "Focus today: {headline} across {} turns ({} involved a tool error)",
            turns.len(),
            error_turns
        ));
    }
    emit(4, &mut on_progress);

    SvapnaReport {
        turns_processed: turns.len(),
        error_turns,
        top_concepts,
        connections,
        insights,
        facts,
    }
}

/// Convenience used by `Chitragupta` to decide whether a session day is
/// worth running the full pipeline for.
pub fn has_assistant_activity(turns: &[Turn]) -> bool {
    turns.iter().any(|t| t.role == Role::Assistant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::store::ToolCall;

    fn turn(content: &str, is_error: bool) -> Turn {
        Turn {
            session_id: "s1".to_string(),
            turn_number: 1,
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: if is_error {
                vec![ToolCall {
                    name: "compile".to_string(),
                    args_json: "{}".to_string(),
                    result_json: None,
                    is_error: true,
                }]
            } else {
                vec![]
            },
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn runs_all_five_phases_in_order() {
        let turns = vec![
            turn("authentication middleware refactor", false),
            turn("authentication middleware tests failing", true),
            turn("authentication middleware fixed", false),
        ];
        let mut seen = Vec::new();
        let report = run_svapna(&turns, |p| seen.push(p.phase));
        assert_eq!(
            seen,
            vec![
                SvapnaPhase::Triage,
                SvapnaPhase::Replay,
                SvapnaPhase::Associate,
                SvapnaPhase::Integrate,
                SvapnaPhase::Crystallize,
            ]
        );
        assert_eq!(report.turns_processed, 3);
        assert_eq!(report.error_turns, 1);
        assert!(!report.facts.is_empty());
    }

    #[test]
    fn empty_day_yields_no_facts() {
        let report = run_svapna(&[], |_| {});
        assert!(report.facts.is_empty());
        assert_eq!(report.turns_processed, 0);
    }
}
