/// Mock embedder for tests and offline runs.
///
/// Produces deterministic bag-of-words vectors: every lowercased alphanumeric
/// token is hashed into one of `dimensions` buckets. Texts that share words
/// therefore score higher under cosine similarity, which is enough to make
/// retrieval behave sensibly without a real model.
use std::hash::Hasher;

use twox_hash::XxHash64;

use super::{Embedder, EmbedderError, ensure_non_empty, l2_normalize};

/// A lexical feature-hashing embedder.
pub struct MockEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("mock-lexical-{dimensions}"),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(token.as_bytes());
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

/// Lowercased alphanumeric runs of `text`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        ensure_non_empty(&[text])?;

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            embedding[self.bucket(&token)] += 1.0;
        }
        l2_normalize(&mut embedding);

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        ensure_non_empty(texts)?;
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
