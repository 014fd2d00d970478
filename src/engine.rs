//! Query-time orchestration: owns the index, tracks readiness, and wires
//! embedding, retrieval and synthesis together.
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{IndexError, VectorIndex};
use crate::indexer::{CorpusIngestor, IngestOptions, IngestionReport, IngestionStatus, TextChunker};
use crate::llm::CompletionBackend;
use crate::models::Passage;
use crate::synthesizer::{Answer, AnswerOutcome, AnswerSynthesizer};

pub const NO_DOCUMENTS_TEXT: &str = "No documents loaded! Please add .txt files to the data folder and restart the server (or trigger re-ingestion).";

pub const NOT_READY_TEXT: &str =
    "The document index is still being built. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Indexing,
    /// A non-empty index is available.
    Ready,
    /// Ingestion finished without producing an index.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub vector_store_ready: bool,
    pub indexed_chunks: usize,
}

pub struct RagEngine<I: VectorIndex> {
    data_path: PathBuf,
    index_path: PathBuf,
    top_k: usize,
    chunker: TextChunker,
    ingest_options: IngestOptions,
    embedder: Arc<dyn Embedder>,
    synthesizer: AnswerSynthesizer,
    index: RwLock<Arc<I>>,
    state: RwLock<EngineState>,
    /// Serializes ingestion runs.
    ingest_lock: Mutex<()>,
}

impl<I: VectorIndex> RagEngine<I> {
    /// `index` is the starting (usually empty) index. It is replaced by the
    /// persisted one on `initialize` when that loads.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn CompletionBackend>,
        index: I,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self {
            data_path: config.data_dir(),
            index_path: config.index_file(),
            top_k: config.top_k.max(1),
            chunker,
            ingest_options: config.ingest_options(),
            embedder,
            synthesizer: AnswerSynthesizer::new(backend, config.synthesis_options()),
            index: RwLock::new(Arc::new(index)),
            state: RwLock::new(EngineState::Uninitialized),
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn current_index(&self) -> Arc<I> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_index(&self, index: I) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state();
        EngineStats {
            state,
            vector_store_ready: state == EngineState::Ready,
            indexed_chunks: self.current_index().len(),
        }
    }

    /// Startup path: adopt the persisted index when it loads, then bring it
    /// up to date with the data folder.
    pub fn initialize(&self) -> Result<IngestionReport> {
        let _guard = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.set_state(EngineState::Indexing);

        let loaded = match I::load(&self.index_path) {
            Ok(index) => {
                info!(
                    "Loaded persisted index from {} ({} chunks)",
                    self.index_path.display(),
                    index.len()
                );
                self.replace_index(index);
                true
            }
            Err(IndexError::NotFound(_)) => {
                debug!("No persisted index at {}", self.index_path.display());
                false
            }
            Err(e) => {
                warn!("Ignoring unreadable index at {}: {e}", self.index_path.display());
                false
            }
        };

        // Without a usable persisted index the manifest cannot be trusted.
        self.run_ingestion(!loaded)
    }

    /// Re-scan the data folder. Waits for any ingestion already running.
    pub fn reingest(&self, force: bool) -> Result<IngestionReport> {
        let _guard = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.set_state(EngineState::Indexing);
        self.run_ingestion(force)
    }

    fn run_ingestion(&self, force: bool) -> Result<IngestionReport> {
        let index = self.current_index();
        let ingestor = CorpusIngestor::new(
            self.embedder.as_ref(),
            self.chunker,
            self.ingest_options.clone(),
        );
        let result = ingestor.ingest(&self.data_path, index.as_ref(), &self.index_path, force);

        let has_index = !index.is_empty();
        let next = if has_index {
            EngineState::Ready
        } else {
            EngineState::Empty
        };
        match &result {
            Ok(report) => {
                match report.status {
                    IngestionStatus::EmptyCorpus if has_index => {
                        warn!("No documents to index, keeping the previous index");
                    }
                    IngestionStatus::EmptyCorpus => {
                        warn!("No documents found. Add .txt files to {}", self.data_path.display());
                    }
                    _ => {}
                }
                info!(
                    "Ingestion finished: {:?}, {} chunks indexed",
                    report.status,
                    index.len()
                );
            }
            Err(e) if has_index => error!("Ingestion failed, keeping the previous index: {e}"),
            Err(e) => error!("Ingestion failed: {e}"),
        }
        self.set_state(next);
        result
    }

    /// Answer a question. Never fails; problems are reported in the answer.
    pub fn ask(&self, question: &str) -> Answer {
        match self.state() {
            EngineState::Uninitialized | EngineState::Indexing => {
                return Answer::new(question, NOT_READY_TEXT, AnswerOutcome::NotReady);
            }
            EngineState::Empty => {
                return Answer::new(question, NO_DOCUMENTS_TEXT, AnswerOutcome::NoDocuments);
            }
            EngineState::Ready => {}
        }
        if question.trim().is_empty() {
            return Answer::new(question, "Please ask a non-empty question.", AnswerOutcome::Failed);
        }

        info!("Searching for: {question}");
        let passages = match self.retrieve(question) {
            Ok(p) => p,
            Err(e) => {
                error!("Retrieval failed: {e}");
                return Answer::new(question, retrieval_failure(&e), AnswerOutcome::Failed);
            }
        };
        self.synthesizer.generate(question, &passages)
    }

    /// Top-k passages for `question`, most similar first.
    pub fn retrieve(&self, question: &str) -> Result<Vec<Passage>> {
        self.retrieve_k(question, self.top_k)
    }

    pub fn retrieve_k(&self, question: &str, k: usize) -> Result<Vec<Passage>> {
        let query = self
            .embedder
            .embed(question)
            .map_err(|e| RagError::Retrieval(e.to_string()))?;
        let hits = self.current_index().search(&query, k)?;
        Ok(hits.into_iter().map(Passage::from).collect())
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Same as `ask` but with a per-call result count.
    pub fn ask_with_top_k(&self, question: &str, k: usize) -> Answer {
        if k == self.top_k || !self.is_ready() || question.trim().is_empty() {
            return self.ask(question);
        }
        match self.retrieve_k(question, k.max(1)) {
            Ok(passages) => self.synthesizer.generate(question, &passages),
            Err(e) => Answer::new(question, retrieval_failure(&e), AnswerOutcome::Failed),
        }
    }
}

fn retrieval_failure(err: &RagError) -> String {
    match err {
        RagError::Retrieval(msg) => format!("Retrieval failed: {msg}"),
        other => format!("Retrieval failed: {other}"),
    }
}
