//! Lexical recall (spec §4.2.1): BM25 over session turns via SQLite FTS5,
//! plus a small in-memory BM25 scorer for scopes that never hit the
//! sqlite mirror (e.g. scoring a handful of explicit memories pulled back
//! from `Storage::list_explicit_memories`).

use std::collections::HashMap;

use crate::store::Storage;
use crate::util::tokenize_keywords;

#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub session_id: String,
    pub turn_number: u32,
    pub score: f64,
}

/// BM25 search over the `turns_fts` mirror (spec §4.2.1's primary path).
pub fn lexical_search(storage: &Storage, query: &str, limit: usize) -> crate::store::Result<Vec<LexicalMatch>> {
    let rows = storage.lexical_search(query, limit)?;
    Ok(rows
        .into_iter()
        .map(|(session_id, turn_number, score)| LexicalMatch {
            session_id,
            turn_number,
            score,
        })
        .collect())
}

/// In-memory BM25 (k1, b configurable per spec §3.11 `RecallSettings`) over
/// a small document set, used when scoring documents that were never
/// mirrored into SQLite (e.g. a batch of explicit memories).
pub struct BM25Index {
    k1: f64,
    b: f64,
    docs: Vec<(String, Vec<String>)>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl BM25Index {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            docs: Vec::new(),
            doc_freq: HashMap::new(),
            avg_len: 0.0,
        }
    }

    pub fn build(k1: f64, b: f64, documents: &[(String, String)]) -> Self {
        let mut index = Self::new(k1, b);
        for (id, text) in documents {
            index.add(id.clone(), text);
        }
        index
    }

    pub fn add(&mut self, id: String, text: &str) {
        let tokens = tokenize_keywords(text, 1, &[]);
        let mut seen = std::collections::HashSet::new();
        for t in &tokens {
            if seen.insert(t.clone()) {
                *self.doc_freq.entry(t.clone()).or_insert(0) += 1;
            }
        }
        self.docs.push((id, tokens));
        let total_len: usize = self.docs.iter().map(|(_, t)| t.len()).sum();
        self.avg_len = total_len as f64 / self.docs.len() as f64;
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<LexicalMatch> {
        let query_tokens = tokenize_keywords(query, 1, &[]);
        let n = self.docs.len() as f64;
        let mut scored: Vec<(String, f64)> = self
            .docs
            .iter()
            .map(|(id, tokens)| {
                let len = tokens.len() as f64;
                let mut score = 0.0;
                for qt in &query_tokens {
                    let tf = tokens.iter().filter(|t| *t == qt).count() as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freq.get(qt).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denom = tf + self.k1 * (1.0 - self.b + self.b * (len / self.avg_len.max(1.0)));
                    score += idf * (tf * (self.k1 + 1.0)) / denom.max(f64::EPSILON);
                }
                (id.clone(), score)
            })
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(id, score)| LexicalMatch {
                session_id: id,
                turn_number: 0,
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bm25_ranks_exact_term_match_higher() {
        let docs = vec![
            ("a".to_string(), "the quick brown fox jumps over the lazy dog".to_string()),
            ("b".to_string(), "rust ownership and borrowing rules explained".to_string()),
        ];
        let index = BM25Index::build(1.2, 0.75, &docs);
        let results = index.search("rust ownership", 5);
        assert_eq!(results[0].session_id, "b");
    }

    #[test]
    fn bm25_empty_query_returns_nothing() {
        let docs = vec![("a".to_string(), "hello world".to_string())];
        let index = BM25Index::build(1.2, 0.75, &docs);
        assert!(index.search("", 5).is_empty());
    }
}
