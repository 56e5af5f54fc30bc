//! MCP protocol type definitions

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Tool descriptor as exposed by a backend and, after aliasing, by the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (backend-local before aliasing, public after)
    pub name: String,
    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool description (may be empty; `null` reads as empty)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    /// Input JSON Schema, passed through unmodified
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
    /// Tool annotations (hints about behavior), passed through unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl ToolDescriptor {
    /// Create a descriptor with the given name, description and schema
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            input_schema,
            annotations: None,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Content item in a tool call result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// Text value
        text: String,
    },
    /// Image content
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    /// Text content item
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
