//! Normalization of raw backend payloads into tool results
//!
//! Backends answer in different shapes: JSON-RPC envelopes nesting a
//! `result`, flat payloads, or payloads flagging failure in an `error` field.
//! Callers always get an MCP-style tool result back.

use serde_json::{Map, Value};

use crate::Result;
use crate::protocol::{Content, ToolsCallResult};

/// Successful tool result wrapping `payload`
#[must_use]
pub fn tool_success_result(payload: Value) -> Value {
    let text = match &payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    to_value(ToolsCallResult {
        content: vec![Content::text(text)],
        structured_content: Some(payload),
        is_error: false,
    })
}

/// Failed tool result carrying `message`
#[must_use]
pub fn tool_error_result(message: impl Into<String>) -> Value {
    to_value(ToolsCallResult {
        content: vec![Content::text(message)],
        structured_content: None,
        is_error: true,
    })
}

fn to_value(result: ToolsCallResult) -> Value {
    // Serializing plain strings and `Value`s cannot fail.
    serde_json::to_value(result).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Message of an embedded `error` field, if the payload carries one
fn embedded_error(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(obj.clone()).to_string(), str::to_string),
        ),
        other => Some(other.to_string()),
    }
}

/// Fold a backend call outcome into a tool result.
///
/// Transport errors and embedded `error` fields become error results. A
/// nested object `result` is returned as is; anything else is wrapped as a
/// success result.
#[must_use]
pub fn normalize_call_result(outcome: Result<Value>) -> Value {
    let payload = match outcome {
        Ok(payload) => payload,
        Err(e) => return tool_error_result(e.detail()),
    };

    if let Some(message) = embedded_error(&payload) {
        return tool_error_result(message);
    }

    match payload.get("result") {
        Some(result @ Value::Object(_)) => result.clone(),
        Some(Value::Null) | None => tool_success_result(payload),
        Some(other) => tool_success_result(other.clone()),
    }
}

/// Returns `true` if `result` is an error-shaped tool result
#[must_use]
pub fn is_error_result(result: &Value) -> bool {
    result.get("isError").and_then(Value::as_bool).unwrap_or(false)
}

/// First text content of a tool result, if any
#[must_use]
pub fn result_text(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|item| item.get("text").and_then(Value::as_str))
}
