//! Crate-level error taxonomy.
//!
//! Each pipeline layer has its own error enum (`EmbedderError`, `IndexError`,
//! `LlmError`); `RagError` is what ingestion and the engine surface upward.
use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::index::IndexError;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or invalid corpus path, chunking parameters, etc.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding backend rejected a chunk; fatal to the ingestion run.
    #[error("embedding failed for chunk {chunk_id}: {source}")]
    Embedding {
        chunk_id: String,
        #[source]
        source: EmbedderError,
    },

    #[error("persisted index is unreadable: {0}")]
    IndexCorruption(String),

    #[error("index error: {0}")]
    Index(IndexError),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("answer synthesis failed: {0}")]
    Synthesis(#[from] LlmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IndexError> for RagError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Corrupt(msg) => RagError::IndexCorruption(msg),
            other => RagError::Index(other),
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
