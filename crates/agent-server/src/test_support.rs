//! Shared fixtures for handler and router tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_core::{
    provider::{Completion, GenerationOptions},
    AgentError, AgentGraphBuilder, LlmProvider, MemorySessionStore, Result, SessionRunner,
    ToolSchema, Turn,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::state::AppState;

/// Replies with queued messages, then reports the backend as down
pub struct QueuedProvider(Mutex<VecDeque<Value>>);

#[async_trait]
impl LlmProvider for QueuedProvider {
    fn name(&self) -> &str {
        "queued"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        _history: &[Turn],
        _tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let next = self.0.lock().unwrap().pop_front();
        next.map(|message| Completion::new(message, options.model.clone()))
            .ok_or_else(|| AgentError::BackendUnavailable("no more replies".into()))
    }
}

/// State over an in-memory store whose model answers with `replies`
pub fn test_state(replies: Vec<Value>) -> AppState {
    let provider = Arc::new(QueuedProvider(Mutex::new(replies.into())));
    let graph = AgentGraphBuilder::new()
        .provider(provider)
        .system_prompt("test")
        .build()
        .unwrap();
    AppState::new(SessionRunner::new(Arc::new(graph), Arc::new(MemorySessionStore::new())))
}
