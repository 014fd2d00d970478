use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedder::{Embedder, EmbedderError};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::indexer::chunker::TextChunker;
use crate::indexer::manifest::{self, IngestManifest};
use crate::models::{Chunk, Document, IndexEntry};

/// How an ingestion run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// Every discovered file was loaded and indexed.
    Complete,
    /// Indexed, but some files could not be read.
    Partial,
    /// Nothing to index. The existing index was left alone.
    EmptyCorpus,
    /// The corpus matches the persisted manifest; nothing was rebuilt.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub documents_loaded: usize,
    pub documents_skipped: usize,
    pub chunks_created: usize,
    pub failures: Vec<FileFailure>,
    pub status: IngestionStatus,
}

impl IngestionReport {
    fn empty_corpus(documents_loaded: usize, documents_skipped: usize, failures: Vec<FileFailure>) -> Self {
        Self {
            documents_loaded,
            documents_skipped,
            chunks_created: 0,
            failures,
            status: IngestionStatus::EmptyCorpus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// File extensions to index, without the dot. Matched case-insensitively.
    pub extensions: Vec<String>,
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["txt".to_string()],
            batch_size: 32,
        }
    }
}

pub struct CorpusIngestor<'a, E: Embedder + ?Sized> {
    pub embedder: &'a E,
    pub chunker: TextChunker,
    extensions: HashSet<String>,
    batch_size: usize,
}

impl<'a, E: Embedder + ?Sized> CorpusIngestor<'a, E> {
    pub fn new(embedder: &'a E, chunker: TextChunker, options: IngestOptions) -> Self {
        Self {
            embedder,
            chunker,
            extensions: options
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            batch_size: options.batch_size.max(1),
        }
    }

    fn is_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }

    /// Files under `dir` with a configured extension, sorted. A missing
    /// directory yields nothing.
    pub fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        if !dir.is_dir() {
            warn!("Data directory {} does not exist", dir.display());
            return Vec::new();
        }

        // Walk builder respects .gitignore by default
        let walker = WalkBuilder::new(dir).hidden(false).build();
        let mut files: Vec<PathBuf> = walker
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .map(|e| e.into_path())
            .filter(|p| self.is_supported_extension(p))
            .collect();
        files.sort();
        files
    }

    /// Read every file as UTF-8. Unreadable files are reported, not fatal.
    fn load_documents(&self, root: &Path, files: &[PathBuf]) -> (Vec<Document>, Vec<FileFailure>) {
        let mut documents = Vec::with_capacity(files.len());
        let mut failures = Vec::new();

        for path in files {
            // Forward slashes keep ids stable across platforms.
            let id = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            match fs::read_to_string(path) {
                Ok(raw_text) => documents.push(Document {
                    id,
                    source_path: path.clone(),
                    raw_text,
                }),
                Err(e) => {
                    warn!("Failed to load {}: {e}", path.display());
                    failures.push(FileFailure {
                        path: id,
                        error: e.to_string(),
                    });
                }
            }
        }
        (documents, failures)
    }

    /// Scan `source_dir` and rebuild `index` from it, persisting the result
    /// to `index_path`.
    ///
    /// Returns `EmptyCorpus` without touching the index when there is
    /// nothing to index, and `Unchanged` when the persisted manifest matches
    /// the corpus (unless `force`). Any embedding failure aborts the run
    /// before the index is modified.
    pub fn ingest<I: VectorIndex + ?Sized>(
        &self,
        source_dir: &Path,
        index: &I,
        index_path: &Path,
        force: bool,
    ) -> Result<IngestionReport> {
        let files = self.discover(source_dir);
        if files.is_empty() {
            warn!("No documents found in {}", source_dir.display());
            return Ok(IngestionReport::empty_corpus(0, 0, Vec::new()));
        }

        let (documents, failures) = self.load_documents(source_dir, &files);
        info!("Loaded {} documents", documents.len());
        if documents.is_empty() {
            warn!("Every document in {} failed to load", source_dir.display());
            return Ok(IngestionReport::empty_corpus(0, 0, failures));
        }

        let fingerprint = manifest::fingerprint(&documents, &self.chunker, self.embedder.model_id());
        if !force && index_path.exists() {
            if let Some(previous) = IngestManifest::load(index_path) {
                if previous.fingerprint == fingerprint {
                    info!("Corpus unchanged since last ingestion, skipping rebuild");
                    return Ok(IngestionReport {
                        documents_loaded: previous.documents,
                        documents_skipped: documents.len().saturating_sub(previous.documents),
                        chunks_created: previous.chunks,
                        failures,
                        status: IngestionStatus::Unchanged,
                    });
                }
            }
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut skipped = 0;
        for doc in &documents {
            if doc.raw_text.trim().is_empty() {
                debug!("Skipping blank document {}", doc.id);
                skipped += 1;
                continue;
            }
            chunks.extend(self.chunker.chunk(doc));
        }
        let loaded = documents.len() - skipped;
        if chunks.is_empty() {
            warn!("All documents in {} are blank", source_dir.display());
            return Ok(IngestionReport::empty_corpus(loaded, skipped, failures));
        }
        info!("Created {} chunks", chunks.len());

        let vectors = self.embed_chunks(&chunks)?;
        let chunks_created = chunks.len();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        index.build(entries)?;
        if let Some(parent) = index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        index.save(index_path)?;

        IngestManifest {
            fingerprint,
            documents: loaded,
            chunks: chunks_created,
            chunk_size: self.chunker.chunk_size(),
            chunk_overlap: self.chunker.chunk_overlap(),
            model_id: self.embedder.model_id().to_string(),
            created_at: Utc::now(),
        }
        .save(index_path)?;
        info!("Vector database ready ({chunks_created} chunks)");

        let status = if failures.is_empty() {
            IngestionStatus::Complete
        } else {
            IngestionStatus::Partial
        };
        Ok(IngestionReport {
            documents_loaded: loaded,
            documents_skipped: skipped,
            chunks_created,
            failures,
            status,
        })
    }

    /// Embed all chunks in batches, in order.
    fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let pb = ProgressBar::new(chunks.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  Embedding [{bar:40.cyan/blue}] {pos}/{len} chunks")
                .map_err(|e| RagError::Configuration(format!("progress template: {e}")))?
                .progress_chars("=>-"),
        );

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embedded = match self.embedder.embed_batch(&texts) {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    return Err(RagError::Embedding {
                        chunk_id: batch[0].id.clone(),
                        source: EmbedderError::InferenceFailed(format!(
                            "expected {} embeddings, got {}",
                            batch.len(),
                            v.len()
                        )),
                    });
                }
                Err(EmbedderError::EmptyInput { index }) => {
                    return Err(RagError::Embedding {
                        chunk_id: batch[index.min(batch.len() - 1)].id.clone(),
                        source: EmbedderError::EmptyInput { index },
                    });
                }
                Err(e) => {
                    warn!("Batch embedding failed ({e}), retrying chunk by chunk");
                    self.embed_one_by_one(batch)?
                }
            };
            vectors.extend(embedded);
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();
        Ok(vectors)
    }

    /// Locate the chunk a failed batch tripped on.
    fn embed_one_by_one(&self, batch: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        batch
            .iter()
            .map(|chunk| {
                self.embedder
                    .embed(&chunk.text)
                    .map_err(|source| RagError::Embedding {
                        chunk_id: chunk.id.clone(),
                        source,
                    })
            })
            .collect()
    }
}
