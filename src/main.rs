use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragdesk::api::{self, AppState};
use ragdesk::config::Config;
use ragdesk::db::HistoryStore;
use ragdesk::embedder::Embedder;
use ragdesk::embedder::download::download_model_files;
use ragdesk::embedder::mock::MockEmbedder;
use ragdesk::embedder::onnx::OnnxEmbedder;
use ragdesk::embedder::tokenizer::DEFAULT_MAX_LENGTH;
use ragdesk::engine::RagEngine;
use ragdesk::index::flat::FlatIndex;
use ragdesk::index::sqlite::SqliteVecIndex;
use ragdesk::index::{IndexBackend, VectorIndex};
use ragdesk::llm::{CompletionBackend, OpenAiCompatibleBackend};
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ragdesk",
    version,
    about = "Answer questions about a folder of text documents"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "RAGDESK_CONFIG", default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Build or refresh the index, then exit
    Ingest {
        /// Rebuild even if the corpus is unchanged
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Answer a single question from the command line
    Ask {
        question: String,
        /// Number of passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
}

// The completion client is a blocking reqwest client, which must not be
// created or dropped inside the async runtime, so setup happens before it.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    let embedder = build_embedder(&config)?;
    let backend = build_backend(&config)?;
    let command = cli.command.unwrap_or(Command::Serve);

    match config.index_backend {
        IndexBackend::Flat => run(command, config, embedder, backend, FlatIndex::new()),
        IndexBackend::Sqlite => {
            let index = SqliteVecIndex::open_in_memory().context("failed to open sqlite-vec index")?;
            run(command, config, embedder, backend, index)
        }
    }
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    if config.uses_mock_embedder() {
        warn!("Using the lexical mock embedder; retrieval quality will be limited");
        return Ok(Arc::new(MockEmbedder::new(config.model.dimensions)));
    }

    let model_dir = config.model_dir();
    if config.model.dir.is_none() {
        download_model_files(&config.model.name, &model_dir)?;
    }
    let embedder = OnnxEmbedder::new(
        &model_dir,
        &config.model.name,
        config.model.dimensions,
        DEFAULT_MAX_LENGTH,
    )
    .with_context(|| format!("failed to load embedding model from {}", model_dir.display()))?;
    Ok(Arc::new(embedder))
}

fn build_backend(config: &Config) -> Result<Arc<dyn CompletionBackend>> {
    let api_key = config.completion.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!("No API key found! Set GROQ_API_KEY or completion.api_key in the config");
    }
    let backend = OpenAiCompatibleBackend::new(
        &config.completion.base_url,
        api_key,
        config.completion.model.clone(),
        config.completion_timeout(),
    )?;
    info!(
        "Completion endpoint: {} ({})",
        backend.endpoint(),
        config.completion.model
    );
    Ok(Arc::new(backend))
}

fn open_history(config: &Config) -> Option<Arc<TokioMutex<HistoryStore>>> {
    let path = config.history_db_path.as_ref()?;
    match HistoryStore::open(path) {
        Ok(store) => Some(Arc::new(TokioMutex::new(store))),
        Err(e) => {
            warn!("History database not available ({path}): {e}");
            None
        }
    }
}

fn run<I: VectorIndex + 'static>(
    command: Command,
    config: Config,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn CompletionBackend>,
    index: I,
) -> Result<()> {
    let engine = Arc::new(RagEngine::new(&config, embedder, backend, index)?);

    match command {
        Command::Serve => serve(&config, engine),
        Command::Ingest { force } => {
            let report = if force {
                engine.reingest(true)?
            } else {
                engine.initialize()?
            };
            if let Some(history) = open_history(&config) {
                if let Err(e) = history.blocking_lock().record_ingestion(&report) {
                    warn!("Failed to record ingestion run: {e}");
                }
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Ask { question, top_k } => {
            if let Err(e) = engine.initialize() {
                error!("Ingestion failed: {e}");
            }
            let answer = match top_k {
                Some(k) => engine.ask_with_top_k(&question, k),
                None => engine.ask(&question),
            };
            println!("{}", answer.text);
            if answer.is_error() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn serve<I: VectorIndex + 'static>(config: &Config, engine: Arc<RagEngine<I>>) -> Result<()> {
    let state = AppState {
        engine: engine.clone(),
        history: open_history(config),
    };
    // `engine` outlives the runtime so the completion client is dropped
    // outside of it.
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    runtime.block_on(async {
        // Ingest in the background; /ask answers 503 until it finishes.
        let init_state = state.clone();
        tokio::spawn(async move {
            let engine = init_state.engine.clone();
            match tokio::task::spawn_blocking(move || engine.initialize()).await {
                Ok(Ok(report)) => api::record_ingestion(&init_state, &report).await,
                Ok(Err(e)) => error!("Startup ingestion failed: {e}"),
                Err(e) => error!("Startup ingestion task failed: {e}"),
            }
        });

        api::serve(&config.bind, state).await
    })
}
