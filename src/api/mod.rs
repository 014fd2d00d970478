//! HTTP front end: question answering, chat history and ingestion control.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex as TokioMutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::db::{ChatRecord, HistoryStore};
use crate::engine::RagEngine;
use crate::index::VectorIndex;
use crate::indexer::IngestionReport;
use crate::synthesizer::AnswerOutcome;

const DEFAULT_HISTORY_LIMIT: usize = 10;

pub struct AppState<I: VectorIndex> {
    pub engine: Arc<RagEngine<I>>,
    /// `None` when the history database could not be opened.
    pub history: Option<Arc<TokioMutex<HistoryStore>>>,
}

impl<I: VectorIndex> Clone for AppState<I> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            history: self.history.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    question: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<ChatRecord>,
}

#[derive(Debug, Deserialize)]
struct ReingestParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_chats: usize,
    total_documents: usize,
    vector_store_ready: bool,
    indexed_chunks: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn history_unavailable() -> ApiError {
    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "History database not available",
    )
}

pub fn router<I: VectorIndex + 'static>(state: AppState<I>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ask", post(ask_handler::<I>))
        .route("/history", get(history_handler::<I>).delete(clear_history_handler::<I>))
        .route("/stats", get(stats_handler::<I>))
        .route("/reingest", post(reingest_handler::<I>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `bind` and serve until Ctrl-C.
pub async fn serve<I: VectorIndex + 'static>(bind: &str, state: AppState<I>) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "message": "Document assistant is running!",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ask_handler<I: VectorIndex + 'static>(
    State(state): State<AppState<I>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Question cannot be empty"));
    }

    let engine = state.engine.clone();
    let q = question.clone();
    let answer = tokio::task::spawn_blocking(move || engine.ask(&q))
        .await
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if answer.outcome == AnswerOutcome::NotReady {
        return Err(error(StatusCode::SERVICE_UNAVAILABLE, answer.text));
    }

    if let Some(history) = &state.history {
        let metadata = json!({ "outcome": answer.outcome, "sources": answer.sources });
        if let Err(e) = history
            .lock()
            .await
            .save_chat(&question, &answer.text, Some(&metadata))
        {
            warn!("Failed to save chat history: {e}");
        }
    }

    Ok(Json(AskResponse {
        question,
        answer: answer.text,
    }))
}

async fn history_handler<I: VectorIndex + 'static>(
    State(state): State<AppState<I>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.history.as_ref().ok_or_else(history_unavailable)?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = history
        .lock()
        .await
        .recent(limit)
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(HistoryResponse { history: records }))
}

async fn clear_history_handler<I: VectorIndex + 'static>(
    State(state): State<AppState<I>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let history = state.history.as_ref().ok_or_else(history_unavailable)?;
    let removed = history
        .lock()
        .await
        .clear()
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!("Cleared {removed} chats");
    Ok(Json(json!({ "status": "Chat history cleared" })))
}

async fn stats_handler<I: VectorIndex + 'static>(
    State(state): State<AppState<I>>,
) -> Json<StatsResponse> {
    let engine_stats = state.engine.stats();
    let history_stats = match &state.history {
        Some(history) => history.lock().await.stats().unwrap_or_else(|e| {
            warn!("Failed to read history stats: {e}");
            Default::default()
        }),
        None => Default::default(),
    };
    Json(StatsResponse {
        total_chats: history_stats.chats,
        total_documents: history_stats.documents,
        vector_store_ready: engine_stats.vector_store_ready,
        indexed_chunks: engine_stats.indexed_chunks,
    })
}

async fn reingest_handler<I: VectorIndex + 'static>(
    State(state): State<AppState<I>>,
    Query(params): Query<ReingestParams>,
) -> Result<Json<IngestionReport>, ApiError> {
    let engine = state.engine.clone();
    let report = tokio::task::spawn_blocking(move || engine.reingest(params.force))
        .await
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    record_ingestion(&state, &report).await;
    Ok(Json(report))
}

/// Log an ingestion run to the history database, if there is one.
pub async fn record_ingestion<I: VectorIndex>(state: &AppState<I>, report: &IngestionReport) {
    if let Some(history) = &state.history {
        if let Err(e) = history.lock().await.record_ingestion(report) {
            warn!("Failed to record ingestion run: {e}");
        }
    }
}
