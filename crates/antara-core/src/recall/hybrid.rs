//! Hybrid fusion and gated self-RAG (spec §4.2.3).
//!
//! The primary fusion path normalizes each retriever's own results by that
//! retriever's max score, then takes a weighted sum -- simple, scale-free
//! across retrievers with very different raw score distributions (BM25 vs
//! cosine vs graph edge weight), and it makes `foundBy` provenance trivial
//! to track per candidate. Reciprocal Rank Fusion is kept alongside as
//! `reciprocal_rank_fusion`/`linear_combination`, retained from this
//! code's earlier two-source hybrid search for callers that prefer
//! rank-based fusion over score-based; the primary recall path below uses
//! the normalize-then-sum algorithm exclusively.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retriever {
    Lexical,
    Vector,
    Graph,
}

impl Retriever {
    pub fn name(&self) -> &'static str {
        match self {
            Retriever::Lexical => "lexical",
            Retriever::Vector => "vector",
            Retriever::Graph => "graph",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub source_id: String,
    pub fused_score: f64,
    pub found_by: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub graph: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 1.0,
            vector: 1.0,
            graph: 1.0,
        }
    }
}

/// Normalizes each retriever's `(source_id, score)` list by its own max,
/// then fuses with a weighted sum. A retriever contributing an empty list
/// is simply skipped. Results are deduped by `source_id` and sorted
/// descending by fused score.
pub fn fuse(
    lexical: &[(String, f64)],
    vector: &[(String, f64)],
    graph: &[(String, f64)],
    weights: FusionWeights,
) -> Vec<FusedResult> {
    let mut fused: HashMap<String, (f64, Vec<&'static str>)> = HashMap::new();

    let mut accumulate = |results: &[(String, f64)], weight: f64, name: &'static str| {
        let max = results.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return;
        }
        for (id, score) in results {
            let normalized = (score / max) * weight;
            let entry = fused.entry(id.clone()).or_insert((0.0, Vec::new()));
            entry.0 += normalized;
            entry.1.push(name);
        }
    };

    accumulate(lexical, weights.lexical, Retriever::Lexical.name());
    accumulate(vector, weights.vector, Retriever::Vector.name());
    accumulate(graph, weights.graph, Retriever::Graph.name());

    let mut results: Vec<FusedResult> = fused
        .into_iter()
        .map(|(source_id, (fused_score, found_by))| FusedResult {
            source_id,
            fused_score,
            found_by,
        })
        .collect();
    results.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Reciprocal Rank Fusion, retained as an alternate two-source fusion
/// utility (not used by the primary `fuse` path above).
pub fn reciprocal_rank_fusion(
    a: &[(String, f32)],
    b: &[(String, f32)],
    k: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for (rank, (key, _)) in a.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32);
    }
    for (rank, (key, _)) in b.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32);
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Linear combination fusion, retained as an alternate (see module docs).
pub fn linear_combination(
    a: &[(String, f32)],
    b: &[(String, f32)],
    weight_a: f32,
    weight_b: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let max_a = a.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in a {
        *scores.entry(key.clone()).or_default() += (score / max_a) * weight_a;
    }
    let max_b = b.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in b {
        *scores.entry(key.clone()).or_default() += (score / max_b) * weight_b;
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Self-RAG gate (spec §4.2.3): a deterministic, no-I/O heuristic deciding
/// whether a query is worth running full hybrid search against, or is
/// better answered from context the caller already has.
pub fn is_gated_open(query: &str, cached_answers: &[&str]) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    let has_question_marker = lower.contains('?')
        || lower.starts_with("what ")
        || lower.starts_with("how ")
        || lower.starts_with("why ")
        || lower.starts_with("when ")
        || lower.starts_with("where ")
        || lower.starts_with("who ");
    let is_substantial = trimmed.split_whitespace().count() >= 3;

    let query_tokens: std::collections::HashSet<&str> = lower.split_whitespace().collect();
    let high_overlap_with_cache = cached_answers.iter().any(|cached| {
        let cached_lower = cached.to_lowercase();
        let cached_tokens: std::collections::HashSet<&str> = cached_lower.split_whitespace().collect();
        if query_tokens.is_empty() {
            return false;
        }
        let overlap = query_tokens.intersection(&cached_tokens).count();
        overlap as f64 / query_tokens.len() as f64 > 0.8
    });

    (has_question_marker || is_substantial) && !high_overlap_with_cache
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_rewards_items_found_by_multiple_retrievers() {
        let lexical = vec![("a".to_string(), 10.0), ("b".to_string(), 5.0)];
        let vector = vec![("a".to_string(), 0.9), ("c".to_string(), 0.8)];
        let graph: Vec<(String, f64)> = vec![];
        let results = fuse(&lexical, &vector, &graph, FusionWeights::default());
        assert_eq!(results[0].source_id, "a");
        assert_eq!(results[0].found_by, vec!["lexical", "vector"]);
    }

    #[test]
    fn empty_retriever_is_skipped_without_panicking() {
        let lexical: Vec<(String, f64)> = vec![];
        let vector = vec![("x".to_string(), 1.0)];
        let graph: Vec<(String, f64)> = vec![];
        let results = fuse(&lexical, &vector, &graph, FusionWeights::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "x");
    }

    #[test]
    fn gate_opens_for_questions_and_closes_for_empty_query() {
        assert!(is_gated_open("What is the plan for tomorrow?", &[]));
        assert!(!is_gated_open("", &[]));
        assert!(!is_gated_open("ok", &[]));
    }

    #[test]
    fn gate_closes_when_query_strongly_overlaps_cached_answer() {
        let cached = ["the plan for tomorrow is to ship the release"];
        assert!(!is_gated_open("what is the plan for tomorrow", &cached));
    }
}
