//! Response Normalization
//!
//! Backends hand back a chat-message-shaped JSON value. Providers disagree on
//! the details: content may be a string, a list of `{"text": ...}` fragments,
//! or missing, and tool calls come flat or nested under `function`. Everything
//! downstream only ever sees the canonical [`Turn`] produced here.

use serde_json::{Map, Value};

use crate::message::{ToolCall, Turn};

/// Convert one backend message into exactly one assistant turn.
///
/// Never fails: unexpected shapes degrade to empty content and no tool calls.
pub fn normalize_response(raw: &Value) -> Turn {
    let content = normalize_content(raw.get("content"));
    let tool_calls = raw
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(index, call)| normalize_tool_call(index, call))
                .collect()
        })
        .unwrap_or_default();

    Turn::assistant_with_calls(content, tool_calls)
}

fn normalize_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(fragments)) => {
            let texts: Vec<&str> = fragments
                .iter()
                .filter_map(|fragment| fragment.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect();
            texts.join("\n").trim_end().to_string()
        }
        _ => String::new(),
    }
}

fn normalize_tool_call(index: usize, call: &Value) -> Option<ToolCall> {
    // OpenAI nests name/arguments under `function`; others put them at the top
    let body = call.get("function").filter(|f| f.is_object()).unwrap_or(call);

    let name = body.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = body
        .get("arguments")
        .or_else(|| body.get("args"))
        .map(normalize_arguments)
        .unwrap_or_default();

    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", index));

    Some(ToolCall::new(id, name, arguments))
}

fn normalize_arguments(arguments: &Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map.clone(),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
