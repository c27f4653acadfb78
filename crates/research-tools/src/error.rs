//! Error Types for Research Tools

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("arXiv API error: {0}")]
    Arxiv(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("'{0}' is not installed or not on PATH")]
    MissingProgram(String),

    #[error("{program} failed: {message}")]
    Process { program: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArgument(msg) => AgentError::ToolValidation(msg),
            ToolError::Config(msg) => AgentError::Config(msg),
            other => AgentError::ToolExecution(other.to_string()),
        }
    }
}
