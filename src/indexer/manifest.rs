//! Corpus fingerprint persisted next to the index.
//!
//! The fingerprint covers every document (relative path and contents), the
//! chunking parameters and the embedding model. When it matches the manifest
//! written by the previous run, the persisted index is already up to date.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::chunker::TextChunker;
use crate::error::Result;
use crate::models::Document;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestManifest {
    pub fingerprint: String,
    pub documents: usize,
    pub chunks: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// `<index_path>.manifest.json`
#[must_use]
pub fn manifest_path(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_owned();
    name.push(".manifest.json");
    PathBuf::from(name)
}

impl IngestManifest {
    /// Read the manifest for `index_path`. Missing or unreadable manifests
    /// yield `None`, which simply forces a rebuild.
    pub fn load(index_path: &Path) -> Option<Self> {
        let path = manifest_path(index_path);
        let data = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Ignoring unreadable manifest {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save(&self, index_path: &Path) -> Result<()> {
        let path = manifest_path(index_path);
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(format!("failed to serialize manifest: {e}")))?;
        fs::write(&path, data)?;
        Ok(())
    }
}

/// Hash of the corpus as seen by one ingestion run.
#[must_use]
pub fn fingerprint(documents: &[Document], chunker: &TextChunker, model_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(
        format!(
            "chunk_size={};chunk_overlap={};model={model_id};",
            chunker.chunk_size(),
            chunker.chunk_overlap()
        )
        .as_bytes(),
    );
    for doc in documents {
        // Length prefixes keep (path, text) pairs unambiguous.
        hasher.update(&(doc.id.len() as u64).to_le_bytes());
        hasher.update(doc.id.as_bytes());
        hasher.update(&(doc.raw_text.len() as u64).to_le_bytes());
        hasher.update(doc.raw_text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
