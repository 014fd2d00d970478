/// Configuration module for ragdesk.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::index::IndexBackend;
use crate::indexer::IngestOptions;
use crate::synthesizer::SynthesisOptions;

/// API key for the completion endpoint.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DATA_PATH_ENV: &str = "RAGDESK_DATA_PATH";
pub const INDEX_PATH_ENV: &str = "RAGDESK_INDEX_PATH";

/// Model name that selects the built-in lexical embedder instead of ONNX.
pub const MOCK_MODEL_NAME: &str = "mock";

// ── Default value functions ──────────────────────────────────────────

fn default_data_path() -> String {
    "./data".to_string()
}

fn default_index_path() -> String {
    "./vector_store/faiss_index".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_top_k() -> usize {
    3
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_history_db_path() -> Option<String> {
    Some("./history.db".to_string())
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_completion_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    500
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_prompt_chars() -> usize {
    12_000
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Folder scanned for documents.
    #[serde(default = "default_data_path")]
    pub data_path: String,

    /// Where the vector index is persisted.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    #[serde(default)]
    pub index_backend: IndexBackend,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    /// Chat history database. `null` disables history.
    #[serde(default = "default_history_db_path")]
    pub history_db_path: Option<String>,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// Sentence-transformers model name, or `"mock"`.
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Overrides `models/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Falls back to `GROQ_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            index_path: default_index_path(),
            index_backend: IndexBackend::default(),
            extensions: default_extensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            embedding_batch_size: default_embedding_batch_size(),
            history_db_path: default_history_db_path(),
            bind: default_bind(),
            model: ModelConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            dir: None,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_completion_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path. Environment overrides are applied
    /// last.
    pub fn load(config_path: &str) -> Result<Self> {
        let mut cfg = Self::load_file(config_path)?;
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn load_file(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        // Parse with defaults
        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        if cfg.extensions.is_empty() {
            cfg.extensions = default_extensions();
        }

        Ok(cfg)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_ENV) {
            self.completion.api_key = Some(key);
        }
        if let Some(path) = non_empty(DATA_PATH_ENV) {
            info!("Using data path from {DATA_PATH_ENV}: {path}");
            self.data_path = path;
        }
        if let Some(path) = non_empty(INDEX_PATH_ENV) {
            info!("Using index path from {INDEX_PATH_ENV}: {path}");
            self.index_path = path;
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(self.top_k > 0, "top_k must be positive");
        anyhow::ensure!(
            self.embedding_batch_size > 0,
            "embedding_batch_size must be positive"
        );
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.extensions.is_empty(),
            "at least one file extension must be specified"
        );
        anyhow::ensure!(
            self.completion.max_tokens > 0,
            "completion.max_tokens must be positive"
        );
        anyhow::ensure!(
            self.completion.max_prompt_chars > 0,
            "completion.max_prompt_chars must be positive"
        );
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.completion.temperature),
            "completion.temperature must be between 0 and 2"
        );
        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_path)
    }

    #[must_use]
    pub fn index_file(&self) -> PathBuf {
        PathBuf::from(&self.index_path)
    }

    /// Model directory, `models/<name>` unless overridden.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        match &self.model.dir {
            Some(dir) => PathBuf::from(dir),
            None => crate::embedder::download::default_model_dir(&self.model.name),
        }
    }

    #[must_use]
    pub fn uses_mock_embedder(&self) -> bool {
        self.model.name == MOCK_MODEL_NAME
    }

    #[must_use]
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            extensions: self.extensions.clone(),
            batch_size: self.embedding_batch_size,
        }
    }

    #[must_use]
    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            temperature: self.completion.temperature,
            max_tokens: self.completion.max_tokens,
            max_prompt_chars: self.completion.max_prompt_chars,
        }
    }

    #[must_use]
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion.timeout_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_path, "./data");
        assert_eq!(config.index_path, "./vector_store/faiss_index");
        assert_eq!(config.index_backend, IndexBackend::Flat);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.model.name, "all-MiniLM-L6-v2");
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.completion.model, "llama-3.3-70b-versatile");
        assert_eq!(config.completion.max_tokens, 500);
        assert!((config.completion.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!config.uses_mock_embedder());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"chunk_size": 1000, "index_backend": "sqlite", "model": {"name": "mock"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.index_backend, IndexBackend::Sqlite);
        assert!(config.uses_mock_embedder());
        // Other fields should have defaults
        assert_eq!(config.top_k, 3);
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.completion.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_history_can_be_disabled() {
        let config: Config = serde_json::from_str(r#"{"history_db_path": null}"#).unwrap();
        assert!(config.history_db_path.is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        let config = Config::load_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config, Config::default());
        // Templates are only generated for the default path.
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.top_k = 7;
        config.model.dir = Some("/opt/models/minilm".into());
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = Config::load_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.model_dir(), PathBuf::from("/opt/models/minilm"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (API_KEY_ENV, "gsk-test"),
            (DATA_PATH_ENV, "/srv/docs"),
            (INDEX_PATH_ENV, "   "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.completion.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.data_path, "/srv/docs");
        // Blank values are ignored.
        assert_eq!(config.index_path, "./vector_store/faiss_index");
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_values() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_model_dir() {
        let config = Config::default();
        assert_eq!(config.model_dir(), PathBuf::from("models/all-MiniLM-L6-v2"));
    }
}
