//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.
//!
//! This path has no native tool calling: tool descriptions ride along in the
//! system message and the model answers with fenced ```` ```tool ```` blocks,
//! which are lifted into `tool_calls` before the graph normalizes the reply.

use agent_core::{
    error::{AgentError, Result},
    message::{Role, Turn},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{describe_tools, ToolSchema},
};
use async_trait::async_trait;
use ollama_rs::{
    generation::{
        chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
    },
    models::ModelOptions as OllamaOptions,
    Ollama,
};
use serde_json::{json, Value};

const TOOL_FENCE: &str = "```tool";
const FENCE_END: &str = "```";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    /// Convert turns to Ollama chat messages
    fn convert_turns(history: &[Turn], tools: &[ToolSchema]) -> Vec<ChatMessage> {
        history
            .iter()
            .enumerate()
            .map(|(index, turn)| match turn.role() {
                Role::System => {
                    let mut content = turn.content().to_string();
                    if index == 0 && !tools.is_empty() {
                        content.push_str("\n\n");
                        content.push_str(&describe_tools(tools));
                    }
                    ChatMessage::new(MessageRole::System, content)
                }
                Role::User => ChatMessage::new(MessageRole::User, turn.content().to_string()),
                Role::Assistant => ChatMessage::new(MessageRole::Assistant, render_assistant(turn)),
                // Tool output is fed back as user context
                Role::Tool => ChatMessage::new(
                    MessageRole::User,
                    format!(
                        "[Tool '{}' returned]\n{}",
                        turn.name().unwrap_or("tool"),
                        turn.content()
                    ),
                ),
            })
            .collect()
    }

    /// Convert an Ollama response into a completion
    fn convert_completion(response: ChatMessageResponse, model: &str) -> Completion {
        let message = lift_tool_calls(&response.message.content);
        let finish_reason = if message.get("tool_calls").is_some() {
            FinishReason::ToolUse
        } else {
            FinishReason::Stop
        };

        Completion {
            message,
            model: model.to_string(),
            usage: response.final_data.as_ref().map(|d| {
                let prompt_tokens = d.prompt_eval_count as u32;
                let completion_tokens = d.eval_count as u32;
                TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            }),
            finish_reason: Some(finish_reason),
        }
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> OllamaOptions {
        OllamaOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(opts.max_tokens as i32)
    }
}

/// Show the model its own earlier calls in the same fenced form it emits
fn render_assistant(turn: &Turn) -> String {
    let mut content = turn.content().to_string();
    for call in turn.tool_calls() {
        if !content.is_empty() {
            content.push('\n');
        }
        let body = json!({"tool": call.name, "arguments": call.arguments});
        content.push_str(&format!("{}\n{}\n{}", TOOL_FENCE, body, FENCE_END));
    }
    content
}

/// Split fenced tool blocks out of `content` into a raw chat message
fn lift_tool_calls(content: &str) -> Value {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(TOOL_FENCE) {
        let after = &rest[start + TOOL_FENCE.len()..];
        let Some(end) = after.find(FENCE_END) else {
            break;
        };

        let whole_block = &rest[..start + TOOL_FENCE.len() + end + FENCE_END.len()];
        match serde_json::from_str::<Value>(after[..end].trim()) {
            Ok(block) => {
                let name = block
                    .get("tool")
                    .or_else(|| block.get("name"))
                    .and_then(Value::as_str);
                let arguments = block
                    .get("arguments")
                    .or_else(|| block.get("args"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                match name {
                    Some(name) => {
                        calls.push(json!({
                            "id": format!("call_{}", calls.len()),
                            "name": name,
                            "arguments": arguments,
                        }));
                        text.push_str(&rest[..start]);
                    }
                    None => {
                        tracing::debug!("Ignoring tool block without a tool name");
                        text.push_str(whole_block);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable tool block");
                text.push_str(whole_block);
            }
        }
        rest = &after[end + FENCE_END.len()..];
    }
    text.push_str(rest);

    let mut message = json!({"role": "assistant", "content": text});
    if !calls.is_empty() {
        message["tool_calls"] = Value::Array(calls);
    }
    message
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        history: &[Turn],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let messages = Self::convert_turns(history, tools);
        let request = ChatMessageRequest::new(options.model.clone(), messages)
            .options(Self::build_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        Ok(Self::convert_completion(response, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by Ollama API
            })
            .collect())
    }
}
