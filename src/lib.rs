//! # ragdesk: local retrieval-augmented question answering
//!
//! Indexes a folder of plain-text documents into a vector index and answers
//! questions by retrieving the most similar passages and handing them to an
//! OpenAI-compatible chat completion endpoint.
//!
//! ## Architecture
//!
//! - **[`indexer`]**: chunking, corpus discovery and ingestion
//! - **[`embedder`]**: text embedding via ONNX Runtime, plus a lexical mock
//! - **[`index`]**: flat and sqlite-vec vector indexes
//! - **[`llm`]** / **[`synthesizer`]**: prompt construction and completion
//! - **[`engine`]**: readiness state machine tying the pipeline together
//! - **[`db`]**: chat history store
//! - **[`api`]**: axum HTTP server
//! - **[`config`]**: JSON configuration with environment overrides

pub mod api;
pub mod config;
pub mod db;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod synthesizer;

pub use engine::{EngineState, RagEngine};
pub use error::{RagError, Result};
