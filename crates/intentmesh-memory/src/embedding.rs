use async_trait::async_trait;
use intentmesh_core::{embedding_text, MeshError, MeshResult, EMBEDDING_DIM};

/// Title terms count this much more than description terms.
pub const TITLE_WEIGHT: f32 = 2.0;
/// Weight of an adjacent word pair relative to a single word.
const PAIR_WEIGHT: f32 = 0.5;

/// Trait for computing text embeddings (vector representations).
///
/// Implementations must be deterministic for identical input and always
/// return vectors of [`EmbeddingProvider::dimension`] components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> MeshResult<Vec<f32>>;

    /// Embed an intention from its title and description. By default the
    /// two are joined and embedded as one text.
    async fn embed_intention(&self, title: &str, description: &str) -> MeshResult<Vec<f32>> {
        self.embed(&embedding_text(title, description)).await
    }

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> MeshResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Local hashed bag-of-words embedding that needs no model download.
///
/// Each word lands in two buckets and each adjacent word pair in one, so
/// "help moving" scores above texts that merely mention both words. Title
/// terms are weighted by [`TITLE_WEIGHT`]. The result is L2-normalized.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, key: &[u8], seed: u8) -> usize {
        let hash = if seed == 0 {
            fnv1a(key)
        } else {
            fnv1a(&[key, &[seed]].concat())
        };
        hash as usize % self.dimension
    }

    /// Add the features of `text` to `vector`, scaled so one field's total
    /// weight is `weight` regardless of its length.
    fn accumulate(&self, vector: &mut [f32], text: &str, weight: f32) {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1)
            .collect();
        if words.is_empty() {
            return;
        }

        let unit = weight / words.len() as f32;
        for word in &words {
            vector[self.bucket(word.as_bytes(), 0)] += unit;
            vector[self.bucket(word.as_bytes(), 1)] += unit * 0.5;
        }
        for pair in words.windows(2) {
            let key = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(key.as_bytes(), 2)] += unit * PAIR_WEIGHT;
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> MeshResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MeshError::Embedding("Cannot embed empty text".to_string()));
        }
        let mut vector = vec![0.0f32; self.dimension];
        self.accumulate(&mut vector, text, 1.0);
        Ok(normalize(vector))
    }

    async fn embed_intention(&self, title: &str, description: &str) -> MeshResult<Vec<f32>> {
        if title.trim().is_empty() && description.trim().is_empty() {
            return Err(MeshError::Embedding("Cannot embed empty text".to_string()));
        }
        let mut vector = vec![0.0f32; self.dimension];
        self.accumulate(&mut vector, title, TITLE_WEIGHT);
        self.accumulate(&mut vector, description, 1.0);
        Ok(normalize(vector))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a, 32 bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
