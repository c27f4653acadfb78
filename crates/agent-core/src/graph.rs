//! Orchestration Graph
//!
//! Two working nodes joined by a conditional edge:
//!
//! ```text
//!   START ──▶ REASONING ──(tool calls)──▶ ACTING
//!                 │   ▲                      │
//!                 │   └──────────────────────┘
//!                 └──(no tool calls)──▶ HALT
//! ```
//!
//! A step appends to the history only after it fully succeeds, so a failed
//! model call leaves the history exactly as it was before that step.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AgentError, Result};
use crate::message::{History, Turn};
use crate::normalize::normalize_response;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::router::{route, Route};
use crate::tool::{Tool, ToolRegistry, DEFAULT_TOOL_TIMEOUT};

/// Default system instruction for sessions that don't supply their own
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful research assistant. \
Use the available tools when they help answer the request, then summarize the results concisely.";

/// Graph configuration
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// System instruction seeded as the first turn of a new session
    pub system_prompt: String,

    /// Maximum reasoning steps per run before giving up
    pub max_steps: usize,

    /// Deadline for each model call
    pub model_timeout: Duration,

    /// Deadline for each tool call
    pub tool_timeout: Duration,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_steps: 10,
            model_timeout: Duration::from_secs(120),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            generation: GenerationOptions::default(),
        }
    }
}

impl GraphConfig {
    /// Overlay `AGENT_*` environment variables on the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay `AGENT_*` settings resolved through `lookup` on the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(model) = lookup("AGENT_MODEL") {
            config.generation.model = model;
        }
        if let Some(steps) = env_parse::<usize>(&lookup, "AGENT_MAX_STEPS")? {
            if steps == 0 {
                return Err(AgentError::Config("AGENT_MAX_STEPS must be at least 1".into()));
            }
            config.max_steps = steps;
        }
        if let Some(secs) = env_parse::<u64>(&lookup, "AGENT_MODEL_TIMEOUT_SECS")? {
            config.model_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>(&lookup, "AGENT_TOOL_TIMEOUT_SECS")? {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(temperature) = env_parse::<f32>(&lookup, "AGENT_TEMPERATURE")? {
            config.generation.temperature = temperature;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        None => Ok(None),
    }
}

/// Graph states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Start,
    Reasoning,
    Acting,
    Halt,
}

/// Progress notifications emitted while a run advances
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A node is about to run
    StepStarted { state: GraphState, step: usize },
    /// A turn was appended to the history
    TurnAppended { turn: Turn },
    /// The run reached HALT
    Halted { reasoning_steps: usize, acting_steps: usize },
}

/// Summary of a completed run
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Content of the final assistant turn
    pub final_content: String,

    /// Number of model invocations
    pub reasoning_steps: usize,

    /// Number of dispatch rounds
    pub acting_steps: usize,

    /// States entered after START, in order
    pub path: Vec<GraphState>,
}

/// The reasoning/acting state machine
pub struct AgentGraph {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: GraphConfig,
}

impl AgentGraph {
    /// Create a new graph; `config.tool_timeout` bounds every tool call
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolRegistry, config: GraphConfig) -> Self {
        Self {
            provider,
            tools: Arc::new(tools.with_timeout(config.tool_timeout)),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: ToolRegistry) -> Self {
        Self::new(provider, tools, GraphConfig::default())
    }

    /// Run the graph from START to HALT over `history`
    pub async fn invoke(&self, history: &mut History) -> Result<RunReport> {
        self.invoke_with_events(history, None).await
    }

    /// Run the graph, reporting progress on `events`
    pub async fn invoke_with_events(
        &self,
        history: &mut History,
        events: Option<&UnboundedSender<GraphEvent>>,
    ) -> Result<RunReport> {
        if history.is_empty() {
            return Err(AgentError::Validation("cannot run the graph on an empty history".into()));
        }

        let emit = |event: GraphEvent| {
            if let Some(tx) = events {
                // A dropped receiver only means nobody is watching
                let _ = tx.send(event);
            }
        };

        let mut state = GraphState::Start;
        let mut path = Vec::new();
        let mut reasoning_steps = 0;
        let mut acting_steps = 0;

        loop {
            state = match state {
                GraphState::Start => GraphState::Reasoning,
                GraphState::Reasoning => {
                    if reasoning_steps >= self.config.max_steps {
                        tracing::warn!(max_steps = self.config.max_steps, "Reasoning step bound reached");
                        return Err(AgentError::RunawayLoop {
                            max_steps: self.config.max_steps,
                        });
                    }
                    reasoning_steps += 1;
                    emit(GraphEvent::StepStarted { state, step: reasoning_steps });

                    let turn = self.reason(history).await?;
                    tracing::debug!(
                        step = reasoning_steps,
                        tool_calls = turn.tool_calls().len(),
                        "Reasoning step complete"
                    );
                    history.push(turn.clone());
                    emit(GraphEvent::TurnAppended { turn });

                    match route(history.turns()) {
                        Route::ContinueToTools => GraphState::Acting,
                        Route::Halt => GraphState::Halt,
                    }
                }
                GraphState::Acting => {
                    acting_steps += 1;
                    emit(GraphEvent::StepStarted { state, step: acting_steps });

                    let Some(request) = history.last().cloned() else {
                        return Err(AgentError::Other("acting step reached with empty history".into()));
                    };
                    for result in self.tools.dispatch_all(&request).await {
                        history.push(result.clone());
                        emit(GraphEvent::TurnAppended { turn: result });
                    }

                    GraphState::Reasoning
                }
                GraphState::Halt => break,
            };
            path.push(state);
        }

        emit(GraphEvent::Halted { reasoning_steps, acting_steps });
        tracing::info!(reasoning_steps, acting_steps, turns = history.len(), "Graph halted");

        Ok(RunReport {
            final_content: history.last().map(|t| t.content().to_string()).unwrap_or_default(),
            reasoning_steps,
            acting_steps,
            path,
        })
    }

    /// One model call, normalized into an assistant turn
    async fn reason(&self, history: &History) -> Result<Turn> {
        let schemas = self.tools.schemas();
        let call = self
            .provider
            .complete(history.turns(), &schemas, &self.config.generation);

        let completion = tokio::time::timeout(self.config.model_timeout, call)
            .await
            .map_err(|_| {
                AgentError::BackendUnavailable(format!(
                    "{} did not respond within {:?}",
                    self.provider.name(),
                    self.config.model_timeout
                ))
            })??;

        Ok(normalize_response(&completion.message))
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}

/// Builder for graph configuration
pub struct AgentGraphBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: GraphConfig,
}

impl Default for AgentGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentGraphBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            config: GraphConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn model_timeout(mut self, timeout: Duration) -> Self {
        self.config.model_timeout = timeout;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<AgentGraph> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        if self.config.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be at least 1".into()));
        }

        Ok(AgentGraph::new(provider, self.tools, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::testing::{call_response, text_response, HangingProvider, OkTool, ScriptedProvider, SlowTool};
    use serde_json::json;

    fn seeded() -> History {
        let mut history = History::with_system_prompt("You are a researcher.");
        history.push(Turn::user("search for X"));
        history
    }

    #[tokio::test]
    async fn test_plain_answer_halts_after_one_step() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("Here is X.")]));
        let graph = AgentGraphBuilder::new().provider(provider.clone()).build().unwrap();

        let mut history = seeded();
        let report = graph.invoke(&mut history).await.unwrap();

        assert_eq!(report.final_content, "Here is X.");
        assert_eq!(report.reasoning_steps, 1);
        assert_eq!(report.acting_steps, 0);
        assert_eq!(report.path, vec![GraphState::Reasoning, GraphState::Halt]);
        assert_eq!(history.len(), 3);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("call_0", "lookup", json!({"query": "X"})),
            text_response("Found it."),
        ]));
        let ok_tool = OkTool::new("lookup");
        let invocations = ok_tool.counter();
        let graph = AgentGraphBuilder::new()
            .provider(provider.clone())
            .tool(ok_tool)
            .build()
            .unwrap();

        let mut history = seeded();
        let initial = history.len();
        let report = graph.invoke(&mut history).await.unwrap();

        assert_eq!(
            report.path,
            vec![GraphState::Reasoning, GraphState::Acting, GraphState::Reasoning, GraphState::Halt]
        );
        assert_eq!(report.reasoning_steps, 2);
        assert_eq!(report.acting_steps, 1);
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(history.len(), initial + 3);

        let turns = history.turns();
        assert!(turns[initial].requests_tools());
        assert_eq!(turns[initial + 1].role(), Role::Tool);
        assert_eq!(turns[initial + 1].content(), "ok");
        assert_eq!(turns[initial + 1].tool_call_id(), Some("call_0"));
        assert_eq!(turns[initial + 2].content(), "Found it.");

        // Second model call saw the call and its result
        assert_eq!(provider.histories()[1].len(), initial + 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("c1", "nonexistent_tool", json!({})),
            text_response("That tool is unavailable."),
        ]));
        let graph = AgentGraphBuilder::new().provider(provider).build().unwrap();

        let mut history = seeded();
        let report = graph.invoke(&mut history).await.unwrap();

        assert_eq!(report.final_content, "That tool is unavailable.");
        assert!(history.turns()[3].content().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_step_bound_stops_runaway_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("a", "lookup", json!({})),
            call_response("b", "lookup", json!({})),
            call_response("c", "lookup", json!({})),
        ]));
        let graph = AgentGraphBuilder::new()
            .provider(provider)
            .tool(OkTool::new("lookup"))
            .max_steps(2)
            .build()
            .unwrap();

        let mut history = seeded();
        let err = graph.invoke(&mut history).await.unwrap_err();

        assert!(matches!(err, AgentError::RunawayLoop { max_steps: 2 }));
        // Two full reason/act rounds were kept
        assert_eq!(history.len(), 2 + 4);
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_history_untouched() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(AgentError::BackendUnavailable(
            "connection refused".into(),
        ))]));
        let graph = AgentGraphBuilder::new().provider(provider).build().unwrap();

        let mut history = seeded();
        let before = history.clone();
        let err = graph.invoke(&mut history).await.unwrap_err();

        assert!(matches!(err, AgentError::BackendUnavailable(_)));
        assert_eq!(history, before);
    }

    #[tokio::test]
    async fn test_model_timeout_is_backend_unavailable() {
        let graph = AgentGraphBuilder::new()
            .provider(Arc::new(HangingProvider))
            .model_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let mut history = seeded();
        let err = graph.invoke(&mut history).await.unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable(_)));
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_the_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("call_0", "lookup", json!({})),
            text_response("done"),
        ]));
        let graph = AgentGraphBuilder::new()
            .provider(provider)
            .tool(OkTool::new("lookup"))
            .build()
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut history = seeded();
        graph.invoke_with_events(&mut history, Some(&tx)).await.unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                GraphEvent::StepStarted { state, .. } => format!("{:?}", state),
                GraphEvent::TurnAppended { turn } => format!("+{}", turn.role()),
                GraphEvent::Halted { .. } => "halt".to_string(),
            });
        }
        assert_eq!(
            kinds,
            vec!["Reasoning", "+assistant", "Acting", "+tool", "Reasoning", "+assistant", "halt"]
        );
    }

    #[tokio::test]
    async fn test_empty_history_rejected() {
        let graph = AgentGraphBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .build()
            .unwrap();
        let err = graph.invoke(&mut History::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(AgentGraphBuilder::new().build(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_steps() {
        let result = AgentGraphBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .max_steps(0)
            .build();
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_applies_tool_timeout() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("c1", "slow", json!({})),
            text_response("Gave up on it."),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(SlowTool(Duration::from_secs(5)));
        let config = GraphConfig {
            tool_timeout: Duration::from_millis(50),
            ..GraphConfig::default()
        };
        let graph = AgentGraph::new(provider, tools, config);

        let mut history = seeded();
        graph.invoke(&mut history).await.unwrap();
        assert_eq!(history.turns()[3].content(), "Error: tool 'slow' timed out after 50ms");
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_config_defaults_without_overrides() {
        let config = GraphConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.model_timeout, Duration::from_secs(120));
        assert_eq!(config.tool_timeout, DEFAULT_TOOL_TIMEOUT);
    }

    #[test]
    fn test_config_overlays() {
        let config = GraphConfig::from_lookup(lookup(&[
            ("AGENT_MODEL", "qwen2.5:14b"),
            ("AGENT_MAX_STEPS", " 4 "),
            ("AGENT_MODEL_TIMEOUT_SECS", "30"),
            ("AGENT_TOOL_TIMEOUT_SECS", "7"),
            ("AGENT_TEMPERATURE", "0.2"),
        ]))
        .unwrap();

        assert_eq!(config.generation.model, "qwen2.5:14b");
        assert_eq!(config.max_steps, 4);
        assert_eq!(config.model_timeout, Duration::from_secs(30));
        assert_eq!(config.tool_timeout, Duration::from_secs(7));
        assert!((config.generation.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_rejects_zero_steps() {
        let err = GraphConfig::from_lookup(lookup(&[("AGENT_MAX_STEPS", "0")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(ref msg) if msg.contains("at least 1")));
    }

    #[test]
    fn test_config_rejects_unparseable_values() {
        let err = GraphConfig::from_lookup(lookup(&[("AGENT_MAX_STEPS", "abc")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(ref msg) if msg.contains("AGENT_MAX_STEPS")));

        let err = GraphConfig::from_lookup(lookup(&[("AGENT_TOOL_TIMEOUT_SECS", "-1")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
