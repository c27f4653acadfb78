//! # agent-runtime
//!
//! Model backends for the research agent.
//!
//! ## Providers
//!
//! - **Ollama** (`ollama`, default): local inference; tools are described in
//!   the system prompt and requested through fenced ```` ```tool ```` blocks
//! - **OpenAI-compatible** (`openai`, default): any Chat Completions endpoint
//!   with native tool calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::ollama::OllamaProvider;
//!
//! let provider = OllamaProvider::new("http://localhost", 11434);
//! let graph = AgentGraphBuilder::new()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, AgentGraph, AgentGraphBuilder, LlmProvider, Result, Role, SessionRunner, Tool,
    ToolRegistry, Turn,
};
