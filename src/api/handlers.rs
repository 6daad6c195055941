//! HTTP request handlers

use super::sse::reply_stream;
use super::types::{
    AssistantResponse, CreateSessionRequest, ErrorResponse, HealthResponse, HistoryResponse,
    StatusResponse, StudentMessage,
};
use super::AppState;
use crate::db::{Block, ChatSession, DbError, NewBlock};
use crate::runtime::{EvaluationOutcome, RuntimeError};
use crate::workflow::{ReplySink, SessionState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

/// Fragments buffered for a slow SSE client before the turn waits
const STREAM_BUFFER: usize = 64;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Setup
        .route("/api/blocks", post(create_block))
        .route("/api/sessions", post(create_session))
        // Conversation
        .route("/chat/message", post(send_message))
        .route("/chat/message/stream", post(stream_message))
        .route("/chat/:id/evaluate", post(evaluate_session))
        .route("/chat/:id/state", get(get_state))
        .route("/chat/:id/history", get(get_history))
        .with_state(state)
}

// ============================================================
// Service Status
// ============================================================

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "operational",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        llm_configured: state.llm_registry.has_models(),
        default_model: state.llm_registry.default_model_id().to_string(),
        models: state.llm_registry.available_models(),
    })
}

// ============================================================
// Blocks and Sessions
// ============================================================

async fn create_block(
    State(state): State<AppState>,
    Json(req): Json<NewBlock>,
) -> Result<Json<Block>, AppError> {
    if state.runtime.registry().kind_for(req.template_id).is_none() {
        return Err(RuntimeError::UnknownTemplate(req.template_id).into());
    }
    let block = state.db.create_block(&req)?;
    tracing::info!(block_id = block.id, template_id = block.template_id, "Block created");
    Ok(Json(block))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, AppError> {
    let session = state.db.create_session(req.block_id)?;
    tracing::info!(session_id = session.id, block_id = req.block_id, "Session created");
    Ok(Json(session))
}

// ============================================================
// Messages
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<StudentMessage>,
) -> Result<Json<AssistantResponse>, AppError> {
    let text = state
        .runtime
        .submit_message(req.session_id, &req.content, &ReplySink::silent())
        .await?;
    Ok(Json(AssistantResponse::interview(text)))
}

/// Stream the reply as SSE `chunk` events followed by `done` or `error`.
///
/// The turn runs on its own task so a client that disconnects does not
/// abort it.
async fn stream_message(
    State(state): State<AppState>,
    Json(req): Json<StudentMessage>,
) -> Result<impl IntoResponse, AppError> {
    // Reject unknown sessions before the stream opens
    state.db.get_session(req.session_id)?;

    let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_BUFFER);
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let runtime = state.runtime.clone();

    tokio::spawn(async move {
        let sink = ReplySink::streaming(chunk_tx);
        let result = runtime
            .submit_message(req.session_id, &req.content, &sink)
            .await
            .map_err(|e| e.to_string());
        // Close the chunk stream before the outcome is delivered
        drop(sink);
        let _ = outcome_tx.send(result);
    });

    Ok(reply_stream(chunk_rx, outcome_rx))
}

// ============================================================
// Evaluation and Inspection
// ============================================================

async fn evaluate_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EvaluationOutcome>, AppError> {
    Ok(Json(state.runtime.evaluate(id).await?))
}

async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SessionState>, AppError> {
    Ok(Json(state.runtime.state(id).await?))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state.runtime.history(id).await?;
    Ok(Json(HistoryResponse {
        count: messages.len(),
        messages,
    }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        if err.is_configuration() {
            AppError::BadRequest(err.to_string())
        } else if err.is_not_found() {
            AppError::NotFound(err.to_string())
        } else {
            tracing::error!(error = %err, "Request failed");
            AppError::Internal(err.to_string())
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::SessionNotFound(_) | DbError::BlockNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            _ => {
                tracing::error!(error = %err, "Database request failed");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
