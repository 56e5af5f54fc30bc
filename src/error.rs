//! Error types for the tool federation gateway

use std::io;

use thiserror::Error;

/// Result type alias for the tool federation gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Tool federation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tool with this public name exists in the tenant's catalogue
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Backend unavailable (not configured, not started, or gone)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend call exceeded its deadline
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error returned by a remote tool server
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Returns `true` for the "no such tool" condition.
    #[must_use]
    pub fn is_tool_not_found(&self) -> bool {
        matches!(self, Self::ToolNotFound(_))
    }

    /// Message suitable for a tool-result payload.
    ///
    /// JSON-RPC errors carry only the remote message, without the code prefix,
    /// so the calling agent sees the text the tool server produced.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::JsonRpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
