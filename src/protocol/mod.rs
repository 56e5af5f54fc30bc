//! MCP protocol types spoken by the remote tool backends

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC version tag
pub const JSONRPC_VERSION: &str = "2.0";
