//! # agent-core
//!
//! Research agent orchestration: a reasoning/acting graph over a checkpointed
//! conversation history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionRunner                           │
//! │  ┌──────────────┐   ┌──────────────────────────────────────┐  │
//! │  │ SessionStore │◀─▶│             AgentGraph                │  │
//! │  │ (checkpoint) │   │  REASONING ──route──▶ ACTING          │  │
//! │  └──────────────┘   │   LlmProvider        ToolRegistry     │  │
//! │                     └──────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait keeps the graph independent of the model backend;
//! whatever message shape a backend returns is folded into a canonical
//! [`Turn`] by [`normalize_response`].

pub mod error;
pub mod graph;
pub mod message;
pub mod normalize;
pub mod provider;
pub mod router;
pub mod runner;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
pub use graph::{AgentGraph, AgentGraphBuilder, GraphConfig, GraphEvent, GraphState, RunReport};
pub use message::{History, Role, ToolCall, Turn};
pub use normalize::normalize_response;
pub use provider::LlmProvider;
pub use router::{route, Route};
pub use runner::SessionRunner;
pub use session::{FileSessionStore, MemorySessionStore, SessionId, SessionStore};
pub use tool::{Tool, ToolRegistry, ToolSchema};
