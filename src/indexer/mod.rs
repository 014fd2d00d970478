pub mod chunker;
pub mod core;
pub mod manifest;

pub use self::chunker::TextChunker;
pub use self::core::{CorpusIngestor, FileFailure, IngestOptions, IngestionReport, IngestionStatus};
