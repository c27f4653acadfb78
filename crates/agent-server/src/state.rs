//! Application State

use std::sync::Arc;

use agent_core::{AgentGraph, LlmProvider, SessionRunner, SessionStore, ToolRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Runs research turns against checkpointed sessions
    pub runner: Arc<SessionRunner>,
}

impl AppState {
    pub fn new(runner: SessionRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    pub fn graph(&self) -> &AgentGraph {
        self.runner.graph()
    }

    /// LLM provider (Ollama, OpenAI-compatible)
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        self.graph().provider()
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.graph().tools()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.runner.store()
    }
}
