//! Conversation Turns
//!
//! Canonical turn record shared by the normalizer, router, dispatcher and
//! session store. Turns are immutable once built; a history only grows by
//! appending new turns.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Role of a turn's author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions, always the first turn of a session
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, echoed back on the matching tool result
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single entry in a conversation history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TurnRecord")]
pub struct Turn {
    role: Role,

    content: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,

    /// Tool name on tool-result turns
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Wire shape of a turn, validated into [`Turn`] on the way in
#[derive(Deserialize)]
struct TurnRecord {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<TurnRecord> for Turn {
    type Error = AgentError;

    fn try_from(record: TurnRecord) -> Result<Self> {
        Turn::new(
            record.role,
            record.content,
            record.tool_calls,
            record.tool_call_id,
            record.name,
        )
    }
}

impl Turn {
    /// Build a turn from raw parts, enforcing the role invariants
    pub fn new(
        role: Role,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        tool_call_id: Option<String>,
        name: Option<String>,
    ) -> Result<Self> {
        if !tool_calls.is_empty() && role != Role::Assistant {
            return Err(AgentError::Validation(format!(
                "tool_calls are only allowed on assistant turns, got role '{}'",
                role
            )));
        }

        match (role, tool_call_id.as_deref()) {
            (Role::Tool, None) => {
                return Err(AgentError::Validation(
                    "tool turns must reference the originating tool_call_id".into(),
                ));
            }
            (Role::Tool, Some("")) => {
                return Err(AgentError::Validation("tool_call_id must not be empty".into()));
            }
            (Role::Tool, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(AgentError::Validation(format!(
                    "tool_call_id is only allowed on tool turns, got role '{}'",
                    other
                )));
            }
        }

        Ok(Self {
            role,
            content: content.into(),
            tool_calls,
            tool_call_id,
            name,
        })
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant turn without tool calls
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant turn requesting tools
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result turn linked to its call
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this is an assistant turn asking for tool execution
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Ordered, append-only conversation history
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    #[serde(deserialize_with = "deserialize_linked_turns")]
    turns: Vec<Turn>,
}

fn deserialize_linked_turns<'de, D>(deserializer: D) -> std::result::Result<Vec<Turn>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let turns = Vec::<Turn>::deserialize(deserializer)?;
    validate_links(&turns).map_err(serde::de::Error::custom)?;
    Ok(turns)
}

/// Every tool turn must answer a call made by an earlier assistant turn
pub fn validate_links(turns: &[Turn]) -> Result<()> {
    let mut issued: HashSet<&str> = HashSet::new();

    for (index, turn) in turns.iter().enumerate() {
        match turn.role {
            Role::Assistant => issued.extend(turn.tool_calls.iter().map(|c| c.id.as_str())),
            Role::Tool => {
                let id = turn.tool_call_id.as_deref().unwrap_or_default();
                if !issued.contains(id) {
                    return Err(AgentError::Validation(format!(
                        "tool turn {} references unknown tool_call_id '{}'",
                        index, id
                    )));
                }
            }
            Role::System | Role::User => {}
        }
    }

    Ok(())
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(Turn::system(prompt));
        history
    }

    /// Build from already-constructed turns, checking call linkage
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self> {
        validate_links(&turns)?;
        Ok(Self { turns })
    }

    /// Append a turn
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append several turns, keeping their order
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    /// Get all turns
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Get the last turn
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Content of the most recent assistant turn
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(Turn::content)
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Serialize to the persisted JSON record list
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a persisted JSON record list
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AgentError::Validation(e.to_string()))
    }
}
