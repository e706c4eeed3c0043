//! Hybrid Recall Engine (spec §4.2).
//!
//! Ties together lexical (`lexical.rs`), vector (`vector.rs`), and graph
//! (`graph.rs`) retrievers through the fusion/gate logic in `hybrid.rs`,
//! with recency boosting (`recency.rs`) applied to session-scoped results.

pub mod embedding;
pub mod graph;
pub mod hybrid;
pub mod lexical;
pub mod recency;
pub mod vector;

use std::sync::RwLock;

use chrono::Utc;

use crate::config::RecallSettings;
use crate::store::{SessionStore, StorageError};
use embedding::{EmbeddingProvider, HashProjectionEmbedder};
use graph::MemoryGraph;
use hybrid::FusionWeights;
use vector::VectorIndex;

const SUMMARY_MAX: usize = 300;
const MATCHED_CONTENT_MAX: usize = 1000;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Vector(#[from] vector::VectorError),
    #[error(transparent)]
    Embedding(#[from] embedding::EmbeddingError),
}

pub type Result<T> = std::result::Result<T, RecallError>;

#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub top_k: usize,
    pub threshold: f32,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecallResult {
    pub source_id: String,
    pub title: String,
    pub relevance: f64,
    pub summary: String,
    pub matched_content: String,
    pub found_by: Vec<&'static str>,
}

pub struct RecallEngine {
    embedder: Box<dyn EmbeddingProvider>,
    vector_index: RwLock<VectorIndex>,
    graph: RwLock<MemoryGraph>,
    settings: RecallSettings,
}

impl RecallEngine {
    /// Builds the embedding provider at first use per spec §4.2.2: try the
    /// `embeddings`-feature model if enabled, otherwise the deterministic
    /// hash-projection fallback. The chosen provider is cached for the
    /// engine's lifetime.
    pub fn new(settings: RecallSettings) -> Self {
        let embedder: Box<dyn EmbeddingProvider> = select_embedder(&settings);
        Self {
            embedder,
            vector_index: RwLock::new(VectorIndex::new()),
            graph: RwLock::new(MemoryGraph::new()),
            settings,
        }
    }

    pub fn load_from_storage(storage: &crate::store::Storage, settings: RecallSettings) -> Result<Self> {
        let embedder: Box<dyn EmbeddingProvider> = select_embedder(&settings);
        let vector_index = VectorIndex::load_from_storage(storage)?;
        Ok(Self {
            embedder,
            vector_index: RwLock::new(vector_index),
            graph: RwLock::new(MemoryGraph::new()),
            settings,
        })
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn index_text(
        &self,
        storage: &crate::store::Storage,
        source_type: &str,
        source_id: &str,
        text: &str,
    ) -> Result<()> {
        self.vector_index
            .read()
            .expect("poisoned")
            .index(storage, self.embedder.as_ref(), source_type, source_id, text)?;
        Ok(())
    }

    pub fn link_co_occurrence(&self, a: &str, b: &str, weight: f64) {
        self.graph.write().expect("poisoned").add_co_occurrence(a, b, weight);
    }

    /// Full hybrid search (spec §4.2.3). `session_store` is consulted for
    /// per-session `updated_at` to apply the recency boost (§4.2.4).
    pub fn recall(
        &self,
        storage: &crate::store::Storage,
        session_store: &SessionStore,
        query: &str,
        options: &RecallOptions,
    ) -> Result<Vec<RecallResult>> {
        let lexical_matches = lexical::lexical_search(storage, query, options.top_k * 4)?;
        let lexical_scores: Vec<(String, f64)> = lexical_matches
            .iter()
            .map(|m| (m.session_id.clone(), m.score))
            .collect();

        let query_vector = self.embedder.embed(query)?;
        let vector_matches = self
            .vector_index
            .read()
            .expect("poisoned")
            .recall(&query_vector, options.top_k * 4, options.threshold)?;
        let vector_scores: Vec<(String, f64)> = vector_matches
            .iter()
            .map(|m| (m.source_id.clone(), m.similarity as f64))
            .collect();

        let graph_scores: Vec<(String, f64)> = if let Some(seed) = lexical_scores.first().map(|(id, _)| id.clone()) {
            self.graph
                .read()
                .expect("poisoned")
                .graph_recall(&seed, 2, options.top_k * 4)
                .into_iter()
                .map(|m| (m.node_id, m.weight))
                .collect()
        } else {
            Vec::new()
        };

        let weights = FusionWeights {
            lexical: self.settings.lexical_weight,
            vector: self.settings.vector_weight,
            graph: self.settings.graph_weight,
        };
        let fused = hybrid::fuse(&lexical_scores, &vector_scores, &graph_scores, weights);

        let now = Utc::now();
        let mut results = Vec::with_capacity(options.top_k);
        for candidate in fused {
            let meta = session_store
                .list_sessions(None)
                .ok()
                .and_then(|metas| metas.into_iter().find(|m| m.id == candidate.source_id));
            let relevance = match &meta {
                Some(m) => recency::apply_recency_boost(candidate.fused_score, m.updated_at, now),
                None => candidate.fused_score,
            };
            let (title, matched_content) = match &meta {
                Some(m) => (
                    m.title.clone().unwrap_or_else(|| candidate.source_id.clone()),
                    vector_matches
                        .iter()
                        .find(|v| v.source_id == candidate.source_id)
                        .map(|v| v.text.clone())
                        .unwrap_or_default(),
                ),
                None => (candidate.source_id.clone(), String::new()),
            };
            results.push(RecallResult {
                source_id: candidate.source_id,
                title,
                relevance,
                summary: truncate_chars(&matched_content, SUMMARY_MAX),
                matched_content: truncate_chars(&matched_content, MATCHED_CONTENT_MAX),
                found_by: candidate.found_by,
            });
            if results.len() >= options.top_k {
                break;
            }
        }
        results.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Self-RAG gate: returns `None` when gated closed, otherwise runs
    /// [`Self::recall`].
    pub fn gated_recall(
        &self,
        storage: &crate::store::Storage,
        session_store: &SessionStore,
        query: &str,
        cached_answers: &[&str],
        options: &RecallOptions,
    ) -> Result<Option<Vec<RecallResult>>> {
        if query.split_whitespace().count() < 1
            || query.trim().len() < self.settings.gate_min_query_len
            || !hybrid::is_gated_open(query, cached_answers)
        {
            return Ok(None);
        }
        Ok(Some(self.recall(storage, session_store, query, options)?))
    }

    /// Clears and rebuilds the vector index from the storage mirror. Safe
    /// to interrupt: partial state is discarded on the next call.
    pub fn reindex_all(&self, storage: &crate::store::Storage) -> Result<usize> {
        storage.clear_embeddings()?;
        let rebuilt = VectorIndex::load_from_storage(storage)?;
        let count = rebuilt.len();
        *self.vector_index.write().expect("poisoned") = rebuilt;
        Ok(count)
    }
}

fn select_embedder(settings: &RecallSettings) -> Box<dyn EmbeddingProvider> {
    #[cfg(feature = "embeddings")]
    {
        match embedding::local::FastEmbedProvider::try_new(settings.embedding_dimensions) {
            Ok(provider) => return Box::new(provider),
            Err(e) => {
                tracing::warn!(error = %e, "embedding model unavailable, falling back to hash projection");
            }
        }
    }
    Box::new(HashProjectionEmbedder::new(settings.embedding_dimensions))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn recall_finds_session_by_lexical_match() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut meta = store
            .create_session("/tmp/proj", "agent-a", "model-x", None, Some("Rust memory layout"))
            .unwrap();
        let turn = crate::store::Turn {
            session_id: meta.id.clone(),
            turn_number: 1,
            role: crate::store::Role::User,
            content: "explain rust ownership and the borrow checker".to_string(),
            tool_calls: vec![],
            agent_id: None,
            model_id: None,
            created_at: Utc::now(),
        };
        store.add_turn(&mut meta, turn).unwrap();

        let engine = RecallEngine::new(RecallSettings::default());
        let results = engine
            .recall(store.storage(), &store, "rust ownership", &RecallOptions::default())
            .unwrap();
        assert!(results.iter().any(|r| r.source_id == meta.id));
    }

    #[test]
    fn gate_returns_none_for_trivial_query() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let engine = RecallEngine::new(RecallSettings::default());
        let result = engine
            .gated_recall(store.storage(), &store, "ok", &[], &RecallOptions::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn reindex_all_rebuilds_vector_index_from_storage() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let engine = RecallEngine::new(RecallSettings::default());
        engine
            .index_text(store.storage(), "session", "s1", "some indexed content")
            .unwrap();
        let count = engine.reindex_all(store.storage()).unwrap();
        assert_eq!(count, 1);
    }
}
