//! OpenAI-compatible Chat Completions provider.
//!
//! Works against any endpoint speaking the Chat Completions protocol
//! (OpenAI, Gemini's OpenAI-compatible API, vLLM, LiteLLM, ...). Tools are
//! offered natively and the returned `choices[0].message` is passed to the
//! graph as-is; fragment-list content is handled by the normalizer.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Role, Turn},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::ToolSchema,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

/// OpenAI-compatible provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL up to and including the version segment
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// HTTP request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(180),
        })
    }
}

/// Chat Completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    /// Build the request body for one completion
    fn build_request(history: &[Turn], tools: &[ToolSchema], options: &GenerationOptions) -> Value {
        let messages: Vec<Value> = history.iter().map(convert_turn).collect();

        let mut body = json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "max_tokens": options.max_tokens,
        });

        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|schema| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": schema.name,
                            "description": schema.description,
                            "parameters": schema.to_json_schema(),
                        }
                    })
                })
                .collect();
        }

        body
    }

    /// Pull the assistant message and metadata out of a response body
    fn parse_response(body: Value, model: &str) -> Result<Completion> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| AgentError::Provider("response contained no choices".into()))?;

        let message = choice.get("message").cloned().unwrap_or(Value::Null);
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(|reason| match reason {
                "length" => FinishReason::Length,
                "tool_calls" | "function_call" => FinishReason::ToolUse,
                "content_filter" => FinishReason::ContentFilter,
                "stop" => FinishReason::Stop,
                _ => FinishReason::Error,
            });

        let usage = body.get("usage").map(|u| {
            let count = |key: &str| u.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
            TokenUsage {
                prompt_tokens: count("prompt_tokens"),
                completion_tokens: count("completion_tokens"),
                total_tokens: count("total_tokens"),
            }
        });

        Ok(Completion {
            message,
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(model)
                .to_string(),
            usage,
            finish_reason,
        })
    }
}

fn convert_turn(turn: &Turn) -> Value {
    match turn.role() {
        Role::Assistant if !turn.tool_calls().is_empty() => {
            let calls: Vec<Value> = turn
                .tool_calls()
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": Value::Object(call.arguments.clone()).to_string(),
                        }
                    })
                })
                .collect();
            let content = if turn.content().is_empty() {
                Value::Null
            } else {
                Value::String(turn.content().to_string())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": turn.tool_call_id(),
            "content": turn.content(),
        }),
        role => json!({"role": role.to_string(), "content": turn.content()}),
    }
}

fn status_error(status: StatusCode, body: &str) -> AgentError {
    let detail = format!("{}: {}", status, body.chars().take(500).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(detail),
        s if s.is_server_error() => AgentError::BackendUnavailable(detail),
        _ => AgentError::Provider(detail),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "OpenAI-compatible"
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(self.url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI-compatible health check failed: {}", e);
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
        let body = Self::build_request(history, tools, options);

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("invalid response body: {}", e)))?;

        Self::parse_response(body, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        name: id.to_string(),
                        context_length: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
