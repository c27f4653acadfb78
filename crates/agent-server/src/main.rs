//! research-agent HTTP Server
//!
//! Axum-based server providing REST API and WebSocket endpoints for the
//! research agent: arXiv search, paper reading and LaTeX rendering tools
//! driven by a reasoning/acting graph over checkpointed sessions.

mod handlers;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    AgentError, AgentGraphBuilder, FileSessionStore, GraphConfig, LlmProvider, MemorySessionStore,
    SessionRunner, SessionStore, ToolRegistry,
};
use agent_runtime::{OllamaProvider, OpenAiProvider};
use research_tools::{register_research_tools, ResearchConfig, RESEARCH_SYSTEM_PROMPT};

use crate::handlers::{
    chat_handler, chat_stream_handler, delete_session, get_session, health_check, list_models,
    list_sessions, list_tools,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = GraphConfig::from_env()?;
    config.system_prompt = RESEARCH_SYSTEM_PROMPT.into();

    // Initialize LLM provider
    let provider = select_provider(&mut config)?;

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to {}", provider.name());
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::debug!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not available - runs will fail until it is reachable", provider.name());
        }
    }

    // Initialize tools
    let mut tools = ToolRegistry::new();
    register_research_tools(&mut tools, &ResearchConfig::from_env()?)?;

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    // Session checkpoints
    let store: Arc<dyn SessionStore> = match std::env::var("SESSION_DIR") {
        Ok(dir) => Arc::new(FileSessionStore::open(dir).await?),
        Err(_) => {
            tracing::warn!("⚠ SESSION_DIR not set - sessions are kept in memory only");
            Arc::new(MemorySessionStore::new())
        }
    };

    tracing::info!(
        model = %config.generation.model,
        max_steps = config.max_steps,
        "Graph configured"
    );

    let graph = AgentGraphBuilder::new()
        .provider(provider)
        .tools(tools)
        .config(config)
        .build()?;

    let state = AppState::new(SessionRunner::new(Arc::new(graph), store));
    let app = build_router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🔬 research-agent server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health              - Health check");
    tracing::info!("  GET    /api/models          - List available models");
    tracing::info!("  GET    /api/tools           - List registered tools");
    tracing::info!("  POST   /api/chat            - Send message");
    tracing::info!("  GET    /api/chat/stream     - WebSocket streaming");
    tracing::info!("  GET    /api/sessions        - List sessions");
    tracing::info!("  GET    /api/sessions/{{id}}   - Session history");
    tracing::info!("  DELETE /api/sessions/{{id}}   - Start over");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Pick the model backend from `AGENT_PROVIDER` (`ollama` or `openai`)
fn select_provider(config: &mut GraphConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    let kind = std::env::var("AGENT_PROVIDER").unwrap_or_else(|_| "ollama".into());

    match kind.to_lowercase().as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::from_env())),
        "openai" => {
            if let Ok(model) = std::env::var("OPENAI_MODEL") {
                config.generation.model = model;
            }
            Ok(Arc::new(OpenAiProvider::from_env()?))
        }
        other => Err(AgentError::Config(format!(
            "AGENT_PROVIDER must be 'ollama' or 'openai', got '{}'",
            other
        ))),
    }
}

fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))

        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))

        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(replies: Vec<Value>) -> Router {
        build_router(test_state(replies))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn chat(body: Value) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_creates_and_resumes_session() {
        let app = app(vec![
            json!({"role": "assistant", "content": "Which field?"}),
            json!({"role": "assistant", "content": [{"type": "text", "text": "Physics it is."}]}),
        ]);

        let (status, body) = send(&app, chat(json!({"message": "help me write a paper"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Which field?");
        let id = body["session_id"].as_str().unwrap().to_string();

        let (_, body) = send(&app, chat(json!({"message": "physics", "session_id": id}))).await;
        assert_eq!(body["message"], "Physics it is.");

        let get = Request::get(format!("/api/sessions/{}", id)).body(Body::empty()).unwrap();
        let (status, body) = send(&app, get).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["turns"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_chat_error_statuses() {
        let app = app(vec![]);

        let (status, body) = send(&app, chat(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (status, _) = send(&app, chat(json!({"message": "hi", "session_id": "a/b"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, chat(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "BACKEND_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = app(vec![]);
        let get = Request::get("/api/sessions/nope").body(Body::empty()).unwrap();
        assert_eq!(send(&app, get).await.0, StatusCode::NOT_FOUND);

        let delete = Request::delete("/api/sessions/nope").body(Body::empty()).unwrap();
        assert_eq!(send(&app, delete).await.0, StatusCode::NOT_FOUND);
    }
}
