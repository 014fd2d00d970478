//! Vector index abstraction and shared similarity helpers.
//!
//! Two backends implement [`VectorIndex`]: an exact in-memory linear scan
//! ([`flat::FlatIndex`]) and a SQLite + sqlite-vec store
//! ([`sqlite::SqliteVecIndex`]). Both rank by cosine similarity and break
//! ties by insertion order.
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{IndexEntry, ScoredChunk};

pub mod flat;
pub mod sqlite;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no persisted index at {0}")]
    NotFound(String),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        IndexError::Storage(err.to_string())
    }
}

/// Capability interface over nearest-neighbor stores.
pub trait VectorIndex: Send + Sync {
    /// Replace the whole index with `entries`. Readers observe either the
    /// previous contents or the new ones, never a mix.
    fn build(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Up to `k` entries by descending cosine similarity, ties in insertion
    /// order. An empty index yields an empty result.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Persist the current contents to `path`.
    fn save(&self, path: &Path) -> Result<(), IndexError>;

    /// Reconstruct an index previously written by `save`.
    fn load(path: &Path) -> Result<Self, IndexError>
    where
        Self: Sized;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which `VectorIndex` implementation backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Exact linear scan, persisted as a directory of flat files.
    #[default]
    Flat,
    /// SQLite database with a sqlite-vec virtual table.
    Sqlite,
}

pub(crate) fn check_k(k: usize) -> Result<(), IndexError> {
    if k == 0 {
        return Err(IndexError::InvalidArgument(
            "k must be a positive number of results".into(),
        ));
    }
    Ok(())
}

/// All vectors must share one non-zero dimensionality. Returns it, or 0 when
/// `entries` is empty.
pub(crate) fn common_dimensions(entries: &[IndexEntry]) -> Result<usize, IndexError> {
    let Some(first) = entries.first() else {
        return Ok(0);
    };
    let expected = first.vector.len();
    if expected == 0 {
        return Err(IndexError::InvalidArgument(format!(
            "chunk {} has an empty embedding",
            first.chunk.id
        )));
    }
    for entry in entries {
        if entry.vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: entry.vector.len(),
            });
        }
    }
    Ok(expected)
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity given precomputed norms. Zero vectors score 0.
pub(crate) fn cosine_with_norms(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

/// Cosine similarity of two equally sized vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

/// Stable descending sort by score, truncated to `k`.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{Chunk, IndexEntry};

    pub fn entry(id: &str, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: format!("{id}#0"),
                document_id: id.to_string(),
                source: format!("{id}.txt"),
                text: text.to_string(),
                sequence_index: 0,
                char_offset: 0,
            },
            vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::entry;
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_check_k() {
        assert!(matches!(check_k(0), Err(IndexError::InvalidArgument(_))));
        assert!(check_k(1).is_ok());
    }

    #[test]
    fn test_common_dimensions() {
        assert_eq!(common_dimensions(&[]).unwrap(), 0);
        let ok = vec![entry("a", "a", vec![1.0, 0.0]), entry("b", "b", vec![0.0, 1.0])];
        assert_eq!(common_dimensions(&ok).unwrap(), 2);

        let bad = vec![entry("a", "a", vec![1.0, 0.0]), entry("b", "b", vec![1.0])];
        assert!(matches!(
            common_dimensions(&bad),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let hits: Vec<ScoredChunk> = ["a", "b", "c", "d"]
            .iter()
            .zip([0.5, 0.9, 0.5, 0.9])
            .map(|(id, score)| ScoredChunk {
                chunk: entry(id, id, vec![1.0]).chunk,
                score,
            })
            .collect();

        let ranked = rank(hits, 3);
        let ids: Vec<&str> = ranked.iter().map(|h| h.chunk.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a"]);
    }

    #[test]
    fn test_backend_serde() {
        let b: IndexBackend = serde_json::from_str("\"sqlite\"").unwrap();
        assert_eq!(b, IndexBackend::Sqlite);
        assert_eq!(IndexBackend::default(), IndexBackend::Flat);
    }
}
