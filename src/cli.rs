//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Federated tool gateway - one tool catalogue per bot over many backends
#[derive(Parser, Debug)]
#[command(name = "tool-federation")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOOL_FEDERATION_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TOOL_FEDERATION_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOOL_FEDERATION_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the federated tool catalogue of a bot
    Tools {
        /// Bot id
        #[arg(short, long)]
        bot: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Call a tool by its public name
    Call {
        /// Bot id
        #[arg(short, long)]
        bot: String,

        /// Public tool name, as listed by `tools`
        tool: String,

        /// JSON object of arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Show the active connections of a bot
    Connections {
        /// Bot id
        #[arg(short, long)]
        bot: String,
    },
}

/// Output format of listings
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned columns
    Table,
    /// Pretty-printed JSON
    Json,
}
