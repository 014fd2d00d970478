/// Embedder trait and shared types for text embedding.
///
/// Implementations map text to fixed-dimension vectors. `embed_batch` must
/// be equivalent to mapping `embed` over its input, in the same order.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("cannot embed empty text (batch position {index})")]
    EmptyInput { index: usize },

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, preserving order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Stable identifier of the model (part of the corpus fingerprint).
    fn model_id(&self) -> &str;
}

/// Reject empty inputs before they reach a backend.
pub(crate) fn ensure_non_empty(texts: &[&str]) -> Result<(), EmbedderError> {
    match texts.iter().position(|t| t.is_empty()) {
        Some(index) => Err(EmbedderError::EmptyInput { index }),
        None => Ok(()),
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec.iter_mut() {
        *v *= inv_norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_non_empty_reports_position() {
        let err = ensure_non_empty(&["a", "b", "", "c"]).unwrap_err();
        assert!(matches!(err, EmbedderError::EmptyInput { index: 2 }));
        assert!(ensure_non_empty(&["a", " "]).is_ok());
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
