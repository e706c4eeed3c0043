//! The five classical Nyaya Hetvabhasa ("fallacious reason") detectors
//! applied heuristically to a proposed syllogism (spec §4.8).

use serde::{Deserialize, Serialize};

use super::Syllogism;
use crate::util::{jaccard, tokenize_keywords, DEFAULT_STOP_WORDS};

const MIN_KEYWORD_LEN: usize = 2;
const ASIDDHA_OVERLAP_THRESHOLD: f64 = 0.2;
const VIRUDDHA_OVERLAP_THRESHOLD: f64 = 0.3;
const PRAKARANA_SAMA_THRESHOLD: f64 = 0.8;
const SHORT_HETU_TOKEN_COUNT: usize = 5;

const NEGATION_WORDS: &[&str] = &["not", "never", "no", "cannot", "cant", "isnt", "doesnt", "wont"];
const UNIVERSAL_QUANTIFIERS: &[&str] = &["all", "every", "always", "none", "everyone", "everything", "everywhere"];
const PAST_INDICATORS: &[&str] = &["was", "were", "had", "did", "previously", "before", "used"];
const FUTURE_INDICATORS: &[&str] = &["will", "shall", "going", "future", "soon", "next", "upcoming"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallacySeverity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallacyKind {
    Asiddha,
    Viruddha,
    Anaikantika,
    PrakaranaSama,
    Kalatita,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallacy {
    pub kind: FallacyKind,
    pub severity: FallacySeverity,
    pub target_field: &'static str,
    pub explanation: String,
}

fn keywords(text: &str) -> Vec<String> {
    tokenize_keywords(text, MIN_KEYWORD_LEN, DEFAULT_STOP_WORDS)
}

fn contains_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

/// Asiddha ("unestablished reason"): the hetu shares too little vocabulary
/// with the example meant to ground it.
fn asiddha(syllogism: &Syllogism) -> Option<Fallacy> {
    let hetu_kw = keywords(&syllogism.hetu);
    let example_kw = keywords(&syllogism.udaharana);
    if hetu_kw.is_empty() {
        return None;
    }
    let overlap = hetu_kw.iter().filter(|w| example_kw.contains(w)).count() as f64 / hetu_kw.len() as f64;
    if overlap < ASIDDHA_OVERLAP_THRESHOLD {
        Some(Fallacy {
            kind: FallacyKind::Asiddha,
            severity: FallacySeverity::Fatal,
            target_field: "hetu",
            explanation: format!("hetu shares only {:.0}% of its keywords with the supporting example", overlap * 100.0),
        })
    } else {
        None
    }
}

/// Viruddha ("contradictory reason"): the hetu negates something while
/// still overlapping heavily with the proposition it's meant to support.
fn viruddha(syllogism: &Syllogism) -> Option<Fallacy> {
    let hetu_kw = keywords(&syllogism.hetu);
    let hetu_tokens: Vec<String> = syllogism.hetu.split_whitespace().map(|w| w.to_lowercase()).collect();
    if !contains_any(&hetu_tokens, NEGATION_WORDS) {
        return None;
    }
    let pratijna_kw = keywords(&syllogism.pratijna);
    let overlap = jaccard(hetu_kw.iter().map(|s| s.as_str()), pratijna_kw.iter().map(|s| s.as_str()));
    if overlap >= VIRUDDHA_OVERLAP_THRESHOLD {
        Some(Fallacy {
            kind: FallacyKind::Viruddha,
            severity: FallacySeverity::Fatal,
            target_field: "hetu",
            explanation: "hetu negates a claim it otherwise shares heavy vocabulary with".to_string(),
        })
    } else {
        None
    }
}

/// Anaikantika ("inconclusive/too-general reason"): the hetu leans on
/// universal quantifiers that overreach the specific claim being made.
fn anaikantika(syllogism: &Syllogism) -> Option<Fallacy> {
    let hetu_tokens: Vec<String> = syllogism.hetu.split_whitespace().map(|w| w.to_lowercase()).collect();
    let quantifier_count = hetu_tokens.iter().filter(|t| UNIVERSAL_QUANTIFIERS.contains(&t.as_str())).count();
    let is_short = hetu_tokens.len() <= SHORT_HETU_TOKEN_COUNT;

    if quantifier_count >= 2 || (quantifier_count >= 1 && is_short) {
        Some(Fallacy {
            kind: FallacyKind::Anaikantika,
            severity: FallacySeverity::Warning,
            target_field: "hetu",
            explanation: "hetu relies on sweeping universal quantifiers".to_string(),
        })
    } else {
        None
    }
}

/// Prakarana-sama ("question-begging reason"): the conclusion just
/// restates the proposition in different words.
fn prakarana_sama(syllogism: &Syllogism) -> Option<Fallacy> {
    let pratijna_kw = keywords(&syllogism.pratijna);
    let nigamana_kw = keywords(&syllogism.nigamana);
    let overlap = jaccard(pratijna_kw.iter().map(|s| s.as_str()), nigamana_kw.iter().map(|s| s.as_str()));
    if overlap > PRAKARANA_SAMA_THRESHOLD {
        Some(Fallacy {
            kind: FallacyKind::PrakaranaSama,
            severity: FallacySeverity::Warning,
            target_field: "nigamana",
            explanation: "conclusion largely restates the proposition rather than following from the reason".to_string(),
        })
    } else {
        None
    }
}

/// Kalatita ("untimely reason"): the hetu is phrased in the past while the
/// proposition or conclusion it supports is phrased in the future.
fn kalatita(syllogism: &Syllogism) -> Option<Fallacy> {
    let hetu_tokens: Vec<String> = syllogism.hetu.split_whitespace().map(|w| w.to_lowercase()).collect();
    if !contains_any(&hetu_tokens, PAST_INDICATORS) {
        return None;
    }
    let pratijna_tokens: Vec<String> = syllogism.pratijna.split_whitespace().map(|w| w.to_lowercase()).collect();
    let nigamana_tokens: Vec<String> = syllogism.nigamana.split_whitespace().map(|w| w.to_lowercase()).collect();
    if contains_any(&pratijna_tokens, FUTURE_INDICATORS) || contains_any(&nigamana_tokens, FUTURE_INDICATORS) {
        Some(Fallacy {
            kind: FallacyKind::Kalatita,
            severity: FallacySeverity::Warning,
            target_field: "hetu",
            explanation: "reason is grounded in the past but the claim it supports is about the future".to_string(),
        })
    } else {
        None
    }
}

pub fn detect_fallacies(syllogism: &Syllogism) -> Vec<Fallacy> {
    [asiddha(syllogism), viruddha(syllogism), anaikantika(syllogism), prakarana_sama(syllogism), kalatita(syllogism)]
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Syllogism {
        Syllogism {
            pratijna: "this cache design reduces latency".to_string(),
            hetu: "it stores hot keys in memory".to_string(),
            udaharana: "memory-resident caches reduce latency in general".to_string(),
            upanaya: "this design stores hot keys in memory like those caches".to_string(),
            nigamana: "therefore this cache design reduces latency".to_string(),
        }
    }

    #[test]
    fn clean_syllogism_triggers_no_fatal_fallacies() {
        let fallacies = detect_fallacies(&base());
        assert!(!fallacies.iter().any(|f| f.severity == FallacySeverity::Fatal));
    }

    #[test]
    fn asiddha_fires_when_hetu_unrelated_to_example() {
        let mut s = base();
        s.hetu = "the moon orbits the earth".to_string();
        s.udaharana = "unrelated statement about cheese".to_string();
        let fallacies = detect_fallacies(&s);
        assert!(fallacies.iter().any(|f| f.kind == FallacyKind::Asiddha));
    }

    #[test]
    fn viruddha_fires_on_negated_overlapping_hetu() {
        let mut s = base();
        s.pratijna = "this design reduces latency under load".to_string();
        s.hetu = "it does not reduce latency under load at all".to_string();
        let fallacies = detect_fallacies(&s);
        assert!(fallacies.iter().any(|f| f.kind == FallacyKind::Viruddha));
    }

    #[test]
    fn anaikantika_fires_on_sweeping_quantifiers() {
        let mut s = base();
        s.hetu = "all caches always reduce latency everywhere".to_string();
        let fallacies = detect_fallacies(&s);
        assert!(fallacies.iter().any(|f| f.kind == FallacyKind::Anaikantika));
    }

    #[test]
    fn prakarana_sama_fires_when_conclusion_restates_proposition() {
        let mut s = base();
        s.pratijna = "this cache design reduces request latency significantly".to_string();
        s.nigamana = "this cache design reduces request latency significantly".to_string();
        let fallacies = detect_fallacies(&s);
        assert!(fallacies.iter().any(|f| f.kind == FallacyKind::PrakaranaSama));
    }

    #[test]
    fn kalatita_fires_on_past_reason_for_future_claim() {
        let mut s = base();
        s.hetu = "it previously stored hot keys in memory".to_string();
        s.nigamana = "therefore this design will reduce future latency".to_string();
        let fallacies = detect_fallacies(&s);
        assert!(fallacies.iter().any(|f| f.kind == FallacyKind::Kalatita));
    }
}
