//! Embedding provider boundary (spec §6.7): `embed(text) -> Vec<f32>`.
//!
//! The real provider (fastembed, local ONNX inference) is grounded on this
//! code's prior local-embedding wrapper and lives behind the `embeddings`
//! feature; without it, or if the model fails to initialize, recall falls
//! back to a deterministic hash-projection embedder so indexing and search
//! keep working end to end in a dependency-light build.

pub const EMBEDDING_DIMENSIONS: usize = 256;
const MAX_TEXT_LENGTH: usize = 8192;

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model initialization failed: {0}")]
    ModelInit(String),
    #[error("embedding generation failed: {0}")]
    Failed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic, dependency-free fallback: hashes overlapping character
/// trigrams into a fixed-width vector and L2-normalizes it. Not semantically
/// meaningful beyond lexical overlap, but stable, fast, and sufficient to
/// keep the vector index and its invariants (fixed dimensionality, cosine
/// similarity) exercised without a model download.
pub struct HashProjectionEmbedder {
    dimensions: usize,
}

impl HashProjectionEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashProjectionEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashProjectionEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }
        let text = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };
        let mut vector = vec![0.0f32; self.dimensions];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let window = 3usize.min(chars.len().max(1));
        if chars.len() < window {
            let h = fnv1a(text.as_bytes());
            vector[(h as usize) % self.dimensions] += 1.0;
        } else {
            for trigram in chars.windows(window) {
                let s: String = trigram.iter().collect();
                let h = fnv1a(s.as_bytes());
                vector[(h as usize) % self.dimensions] += 1.0;
            }
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(feature = "embeddings")]
pub mod local {
    use super::{EmbeddingError, EmbeddingProvider};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    pub struct FastEmbedProvider {
        model: Mutex<TextEmbedding>,
        dimensions: usize,
    }

    impl FastEmbedProvider {
        pub fn try_new(dimensions: usize) -> Result<Self, EmbeddingError> {
            let cache_dir = directories::ProjectDirs::from("com", "antara", "core")
                .map(|p| p.cache_dir().join("fastembed"))
                .unwrap_or_else(|| std::path::PathBuf::from(".fastembed_cache"));
            let _ = std::fs::create_dir_all(&cache_dir);

            let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(false)
                .with_cache_dir(cache_dir);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(model),
                dimensions,
            })
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.is_empty() {
                return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
            }
            let mut model = self
                .model
                .lock()
                .map_err(|e| EmbeddingError::Failed(format!("lock poisoned: {e}")))?;
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            let mut vector = embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Failed("no embedding produced".to_string()))?;
            vector.truncate(self.dimensions);
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut vector {
                    *x /= norm;
                }
            }
            Ok(vector)
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashProjectionEmbedder::default();
        let a = embedder.embed("rust ownership").unwrap();
        let b = embedder.embed("rust ownership").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embedder_distinguishes_distinct_text() {
        let embedder = HashProjectionEmbedder::default();
        let a = embedder.embed("rust ownership").unwrap();
        let b = embedder.embed("completely different topic about cooking").unwrap();
        assert!(cosine_similarity(&a, &b) < 0.9);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }
}
