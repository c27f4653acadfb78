//! Test doubles for providers and tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::message::{ToolCall, Turn};
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::tool::{ParameterSchema, Tool, ToolSchema};

pub fn text_response(text: &str) -> Result<Value> {
    Ok(json!({"role": "assistant", "content": text}))
}

pub fn call_response(id: &str, name: &str, arguments: Value) -> Result<Value> {
    Ok(json!({
        "role": "assistant",
        "content": "",
        "tool_calls": [{"id": id, "name": name, "arguments": arguments}]
    }))
}

/// Replays canned responses and records every history it was given
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Value>>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Value>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<Value>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn histories(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        history: &[Turn],
        _tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.seen.lock().unwrap().push(history.to_vec());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::BackendUnavailable("script exhausted".into())));
        next.map(|message| Completion::new(message, options.model.clone()))
    }
}

/// Holds every call at a gate until the test lets it through
pub struct GatedProvider {
    gate: tokio::sync::Semaphore,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Let `n` more calls answer
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever waiting at the gate at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, _: &[Turn], _: &[ToolSchema], options: &GenerationOptions) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        permit
            .map_err(|_| AgentError::BackendUnavailable("gate closed".into()))?
            .forget();

        Ok(Completion::new(json!({"role": "assistant", "content": "ok"}), options.model.clone()))
    }
}

/// Yield to other tasks until `done` holds
pub async fn wait_until(done: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Never answers
pub struct HangingProvider;

#[async_trait]
impl LlmProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    async fn complete(&self, _: &[Turn], _: &[ToolSchema], _: &GenerationOptions) -> Result<Completion> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(AgentError::BackendUnavailable("unreachable".into()))
    }
}

fn schema(name: &str, parameters: Vec<ParameterSchema>) -> ToolSchema {
    ToolSchema {
        name: name.into(),
        description: format!("test tool {}", name),
        parameters,
        has_side_effects: false,
    }
}

/// Returns its `text` argument
pub struct EchoTool(String);

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.0, vec![ParameterSchema::required("text", "string", "Text to echo")])
    }

    async fn execute(&self, call: &ToolCall) -> Result<String> {
        Ok(call.arguments.get("text").and_then(Value::as_str).unwrap_or_default().to_string())
    }
}

/// Always returns "ok" and counts invocations
pub struct OkTool {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl OkTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for OkTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.name, vec![])
    }

    async fn execute(&self, _call: &ToolCall) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("ok".into())
    }
}

/// Always fails
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn schema(&self) -> ToolSchema {
        schema("explode", vec![])
    }

    async fn execute(&self, _call: &ToolCall) -> Result<String> {
        Err(AgentError::Other("boom".into()))
    }
}

/// Sleeps before answering
pub struct SlowTool(pub Duration);

#[async_trait]
impl Tool for SlowTool {
    fn schema(&self) -> ToolSchema {
        schema("slow", vec![])
    }

    async fn execute(&self, _call: &ToolCall) -> Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("late".into())
    }
}
