//! Exact linear-scan index.
//!
//! The whole index lives in an immutable snapshot; `build` swaps in a new
//! snapshot under a write lock, and searches clone the `Arc` and scan without
//! holding the lock.
//!
//! On disk the index is a directory:
//! - `vectors.bin`: little-endian `f32`, row-major, `count * dimensions` values
//! - `chunks.json`: side-table, position → chunk
//! - `index.json`: header with format version, shape and a blake3 checksum of
//!   `vectors.bin`, written last
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    IndexError, VectorIndex, check_k, common_dimensions, cosine_with_norms, l2_norm, rank,
};
use crate::models::{Chunk, IndexEntry, ScoredChunk};

const FORMAT_VERSION: u32 = 1;
const HEADER_FILE: &str = "index.json";
const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format_version: u32,
    dimensions: usize,
    count: usize,
    vectors_blake3: String,
}

#[derive(Debug, Default)]
struct Snapshot {
    dimensions: usize,
    chunks: Vec<Chunk>,
    /// Row-major, `chunks.len() * dimensions` values.
    vectors: Vec<f32>,
    norms: Vec<f32>,
}

impl Snapshot {
    fn new(dimensions: usize, chunks: Vec<Chunk>, vectors: Vec<f32>) -> Self {
        let norms = if dimensions == 0 {
            Vec::new()
        } else {
            vectors.chunks_exact(dimensions).map(l2_norm).collect()
        };
        Self {
            dimensions,
            chunks,
            vectors,
            norms,
        }
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimensions..(i + 1) * self.dimensions]
    }
}

/// In-memory exact nearest-neighbor index.
#[derive(Debug, Default)]
pub struct FlatIndex {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl FlatIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, snapshot: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

/// Little-endian bytes of `values`, whatever the host byte order.
fn serialize_vectors(values: &[f32]) -> Vec<u8> {
    let bits: Vec<u32> = values.iter().map(|v| v.to_bits().to_le()).collect();
    bytemuck::cast_slice(&bits).to_vec()
}

fn deserialize_vectors(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_bits(u32::from_le(bytemuck::pod_read_unaligned(b))))
        .collect()
}

/// Write `data` next to `dest` and rename it into place.
fn write_replace(dest: &Path, data: &[u8]) -> Result<(), IndexError> {
    let tmp = dest.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, dest)?;
    Ok(())
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> IndexError {
    IndexError::Corrupt(format!("{}: {what}", path.display()))
}

impl VectorIndex for FlatIndex {
    fn build(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimensions = common_dimensions(&entries)?;

        let mut chunks = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len() * dimensions);
        for entry in entries {
            vectors.extend_from_slice(&entry.vector);
            chunks.push(entry.chunk);
        }

        debug!("Built flat index: {} chunks x {dimensions} dims", chunks.len());
        self.replace(Snapshot::new(dimensions, chunks, vectors));
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        check_k(k)?;

        let snap = self.current();
        if snap.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != snap.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: snap.dimensions,
                actual: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        let hits = snap
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_with_norms(query, query_norm, snap.row(i), snap.norms[i]),
            })
            .collect();

        Ok(rank(hits, k))
    }

    fn save(&self, path: &Path) -> Result<(), IndexError> {
        let snap = self.current();
        fs::create_dir_all(path)?;

        let vector_bytes = serialize_vectors(&snap.vectors);
        let chunks_json = serde_json::to_vec(&snap.chunks)
            .map_err(|e| IndexError::Storage(format!("failed to serialize chunks: {e}")))?;
        let header = Header {
            format_version: FORMAT_VERSION,
            dimensions: snap.dimensions,
            count: snap.chunks.len(),
            vectors_blake3: blake3::hash(&vector_bytes).to_hex().to_string(),
        };
        let header_json = serde_json::to_vec_pretty(&header)
            .map_err(|e| IndexError::Storage(format!("failed to serialize header: {e}")))?;

        write_replace(&path.join(VECTORS_FILE), &vector_bytes)?;
        write_replace(&path.join(CHUNKS_FILE), &chunks_json)?;
        write_replace(&path.join(HEADER_FILE), &header_json)?;

        info!(
            "Saved flat index ({} chunks) to {}",
            header.count,
            path.display()
        );
        Ok(())
    }

    fn load(path: &Path) -> Result<Self, IndexError> {
        let header_path = path.join(HEADER_FILE);
        if !header_path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let header: Header = serde_json::from_slice(&fs::read(&header_path)?)
            .map_err(|e| corrupt(&header_path, e))?;
        if header.format_version != FORMAT_VERSION {
            return Err(corrupt(
                &header_path,
                format!("unsupported format version {}", header.format_version),
            ));
        }

        let vectors_path = path.join(VECTORS_FILE);
        let vector_bytes = fs::read(&vectors_path).map_err(|e| corrupt(&vectors_path, e))?;
        if blake3::hash(&vector_bytes).to_hex().as_str() != header.vectors_blake3 {
            return Err(corrupt(&vectors_path, "checksum mismatch"));
        }
        if header.count > 0 && header.dimensions == 0 {
            return Err(corrupt(&header_path, "zero dimensions for a non-empty index"));
        }
        let expected_len = header
            .count
            .checked_mul(header.dimensions)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt(&header_path, "index shape overflows"))?;
        if vector_bytes.len() != expected_len {
            return Err(corrupt(
                &vectors_path,
                format!("expected {expected_len} bytes, found {}", vector_bytes.len()),
            ));
        }

        let chunks_path = path.join(CHUNKS_FILE);
        let chunks: Vec<Chunk> =
            serde_json::from_slice(&fs::read(&chunks_path).map_err(|e| corrupt(&chunks_path, e))?)
                .map_err(|e| corrupt(&chunks_path, e))?;
        if chunks.len() != header.count {
            return Err(corrupt(
                &chunks_path,
                format!("expected {} chunks, found {}", header.count, chunks.len()),
            ));
        }

        info!("Loaded flat index ({} chunks) from {}", chunks.len(), path.display());
        let index = Self::new();
        index.replace(Snapshot::new(
            header.dimensions,
            chunks,
            deserialize_vectors(&vector_bytes),
        ));
        Ok(index)
    }

    fn len(&self) -> usize {
        self.current().chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::entry;

    fn sample_index() -> FlatIndex {
        let index = FlatIndex::new();
        index
            .build(vec![
                entry("sky", "The sky is blue", vec![1.0, 0.0, 0.0]),
                entry("water", "Water is wet", vec![0.0, 1.0, 0.0]),
                entry("mixed", "Blue water", vec![0.7, 0.7, 0.0]),
                entry("twin", "The sky again", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.1, 0.0], 4).unwrap();

        assert_eq!(results.len(), 4);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // Identical vectors tie; insertion order decides.
        assert_eq!(results[0].chunk.document_id, "sky");
        assert_eq!(results[1].chunk.document_id, "twin");
        assert_eq!(results[3].chunk.document_id, "water");
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 1.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 1.0, 0.0], 10).unwrap().len(), 4);
    }

    #[test]
    fn test_search_rejects_zero_k() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 0),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_search_unbuilt_index_is_empty() {
        let index = FlatIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 2.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_build_replaces_previous_contents() {
        let index = sample_index();
        index
            .build(vec![entry("only", "Only entry", vec![0.0, 0.0, 1.0])])
            .unwrap();

        assert_eq!(index.len(), 1);
        let results = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_id, "only");
    }

    #[test]
    fn test_failed_build_keeps_previous_contents() {
        let index = sample_index();
        let err = index.build(vec![
            entry("a", "a", vec![1.0, 0.0, 0.0]),
            entry("b", "b", vec![1.0]),
        ]);
        assert!(err.is_err());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_index");
        let index = sample_index();
        index.save(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());

        for query in [[1.0, 0.1, 0.0], [0.0, 1.0, 0.0], [0.3, 0.3, 0.9]] {
            for k in 1..=5 {
                assert_eq!(
                    index.search(&query, k).unwrap(),
                    loaded.search(&query, k).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_save_load_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        FlatIndex::new().save(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FlatIndex::load(&dir.path().join("nope")),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_detects_tampered_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_index");
        sample_index().save(&path).unwrap();

        fs::write(path.join(VECTORS_FILE), [0u8; 7]).unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn test_load_detects_garbage_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_index");
        sample_index().save(&path).unwrap();

        fs::write(path.join(HEADER_FILE), "not json").unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(IndexError::Corrupt(_))));
    }

    fn rewrite_header(path: &Path, count: usize, dimensions: usize) {
        let vectors = fs::read(path.join(VECTORS_FILE)).unwrap();
        let header = Header {
            format_version: FORMAT_VERSION,
            dimensions,
            count,
            vectors_blake3: blake3::hash(&vectors).to_hex().to_string(),
        };
        fs::write(path.join(HEADER_FILE), serde_json::to_vec(&header).unwrap()).unwrap();
    }

    #[test]
    fn test_load_rejects_overflowing_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_index");
        FlatIndex::new().save(&path).unwrap();

        rewrite_header(&path, usize::MAX / 2, 4);
        assert!(matches!(FlatIndex::load(&path), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn test_load_rejects_zero_dimensions_with_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat_index");
        sample_index().save(&path).unwrap();

        fs::write(path.join(VECTORS_FILE), b"").unwrap();
        rewrite_header(&path, 4, 0);
        assert!(matches!(FlatIndex::load(&path), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn test_serialize_vectors_little_endian() {
        let bytes = serialize_vectors(&[1.0, -3.5]);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x60, 0xc0]);
        assert_eq!(deserialize_vectors(&bytes), vec![1.0, -3.5]);
    }
}
