//! Tool Federation Library
//!
//! Presents AI agents ("bots") with one flat, tenant-scoped tool catalogue
//! assembled from several backend families, and routes calls on public tool
//! names back to the backend that owns them.
//!
//! # Features
//!
//! - **Federated catalogue**: built-in filesystem tools plus every active
//!   HTTP, SSE and stdio connection of a bot, with collision-free names
//! - **Route cache**: per-bot catalogues served for five seconds
//! - **Uniform results**: backend payloads normalized into MCP tool results
//! - **Multi-Transport**: stdio, Streamable HTTP, SSE
//!
//! # Protocol Version
//!
//! Talks MCP 2025-03-26 to remote tool servers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod federation;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
