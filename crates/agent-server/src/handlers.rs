//! HTTP/WebSocket Handlers

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use agent_core::{
    provider::ModelInfo, AgentError, GraphEvent, SessionId, ToolSchema, Turn,
};

use crate::state::AppState;

const DEFAULT_SESSION_LIMIT: usize = 50;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub tools: usize,
    pub persistent_sessions: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status and machine-readable code for an agent error
pub fn classify(err: &AgentError) -> (StatusCode, &'static str) {
    match err {
        AgentError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        AgentError::RunawayLoop { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "STEP_LIMIT"),
        AgentError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        AgentError::BackendUnavailable(_) | AgentError::Timeout { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    }
}

fn api_error(err: &AgentError) -> ApiError {
    let (status, code) = classify(err);
    if status.is_server_error() {
        tracing::error!("Agent error: {}", err);
    } else {
        tracing::warn!("Request rejected: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: code.into(),
        }),
    )
}

fn not_found(id: &SessionId) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session '{}' not found", id),
            code: "SESSION_NOT_FOUND".into(),
        }),
    )
}

/// Parse a client-supplied id, or mint a fresh one
fn session_id(requested: Option<String>) -> Result<SessionId, AgentError> {
    requested.map_or_else(|| Ok(SessionId::new()), SessionId::parse)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider().health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider().name().to_string(),
        provider_connected,
        tools: state.tools().len(),
        persistent_sessions: state.store().is_persistent(),
    })
}

/// Models offered by the configured backend
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    state
        .provider()
        .list_models()
        .await
        .map(Json)
        .map_err(|e| api_error(&e))
}

/// Registered tool schemas
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.tools().schemas())
}

/// Main chat endpoint (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let id = session_id(payload.session_id).map_err(|e| api_error(&e))?;

    let message = state
        .runner
        .run(&id, &payload.message)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ChatResponse {
        session_id: id.to_string(),
        message,
    }))
}

/// Most recently active sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let records = state
        .store()
        .list(params.limit.unwrap_or(DEFAULT_SESSION_LIMIT))
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| SessionSummary {
                turns: r.turn_count(),
                id: r.id.to_string(),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect(),
    ))
}

/// Full history of one session
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let id = SessionId::parse(id).map_err(|e| api_error(&e))?;
    let record = state
        .store()
        .record(&id)
        .await
        .map_err(|e| api_error(&e))?
        .ok_or_else(|| not_found(&id))?;

    Ok(Json(SessionDetail {
        id: record.id.to_string(),
        turns: record.history.turns().to_vec(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

/// Forget a session so the next message starts a new research task
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId::parse(id).map_err(|e| api_error(&e))?;
    if state.runner.reset(&id).await.map_err(|e| api_error(&e))? {
        tracing::info!(session = %id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

fn error_frame(err: &AgentError) -> String {
    let (_, code) = classify(err);
    serde_json::json!({"type": "error", "error": err.user_message(), "code": code}).to_string()
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    serve_frames(receiver, sender, state).await;
}

/// Answer each chat request frame with its graph events, then one
/// `reply` or `error` frame
async fn serve_frames<I, O, E>(mut receiver: I, mut sender: O, state: AppState)
where
    I: Stream<Item = Result<Message, E>> + Unpin,
    O: Sink<Message> + Unpin,
    E: std::fmt::Display,
{
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        // Parse request
        let request: ChatRequest = match serde_json::from_str(&msg) {
            Ok(r) => r,
            Err(e) => {
                let error = serde_json::json!({"type": "error", "error": e.to_string(), "code": "INVALID_REQUEST"});
                let _ = sender.send(Message::Text(error.to_string().into())).await;
                continue;
            }
        };

        let id = match session_id(request.session_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = sender.send(Message::Text(error_frame(&e).into())).await;
                continue;
            }
        };

        // Run on its own task; events arrive until the sender is dropped
        let (tx, mut rx) = mpsc::unbounded_channel::<GraphEvent>();
        let runner = state.runner.clone();
        let run_id = id.clone();
        let run = tokio::spawn(async move {
            runner
                .run_with_events(&run_id, &request.message, Some(&tx))
                .await
        });

        let mut client_gone = false;
        while let Some(event) = rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                client_gone = true;
                break;
            }
        }

        // Let the run finish and checkpoint even if the client left
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AgentError::Other(format!("run task failed: {}", e))),
        };
        if client_gone {
            break;
        }

        let frame = match outcome {
            Ok(report) => serde_json::json!({
                "type": "reply",
                "session_id": id.to_string(),
                "message": report.final_content,
                "reasoning_steps": report.reasoning_steps,
                "acting_steps": report.acting_steps,
            })
            .to_string(),
            Err(e) => error_frame(&e),
        };
        if sender.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
}
