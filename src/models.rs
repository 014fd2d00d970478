//! Core data types flowing through the pipeline.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A source file loaded during an ingestion scan. Discarded after chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated.
    pub id: String,
    pub source_path: PathBuf,
    pub raw_text: String,
}

/// A bounded contiguous substring of a document; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{document_id}#{sequence_index}"`
    pub id: String,
    pub document_id: String,
    /// Display path of the originating document.
    pub source: String,
    pub text: String,
    pub sequence_index: usize,
    /// Offset of the first character of `text` inside the document, in chars.
    pub char_offset: usize,
}

/// A chunk paired with its embedding, as handed to `VectorIndex::build`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One search hit. Higher `score` means more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Passage text plus where it came from, in retrieval order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub text: String,
    pub source: String,
}

impl From<ScoredChunk> for Passage {
    fn from(hit: ScoredChunk) -> Self {
        Self {
            text: hit.chunk.text,
            source: hit.chunk.source,
        }
    }
}
