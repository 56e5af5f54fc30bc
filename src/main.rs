//! Tool Federation - one tool catalogue per bot over many MCP backends

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{error, info};

use tool_federation::{
    backend::TransportBackend,
    cli::{Cli, Command, OutputFormat},
    config::Config,
    connection::ConnectionDirectory,
    federation::{FederationGateway, ToolSessionContext, outcome},
    protocol::ToolDescriptor,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let directory = Arc::new(config.directory());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bots = config.bots.len(),
        filesystem = config.filesystem.enabled,
        "Starting tool federation"
    );

    if let Command::Connections { bot } = &cli.command {
        let connections = directory.list_active_by_bot(bot).await?;
        println!("{}", serde_json::to_string_pretty(&connections)?);
        return Ok(ExitCode::SUCCESS);
    }

    let backend = Arc::new(TransportBackend::from_config(&config));
    let gateway = FederationGateway::new(backend.clone(), directory)
        .with_default_timeout(config.transport.call_timeout);

    let code = match cli.command {
        Command::Tools { bot, format } => {
            let tools = gateway.list_tools(&ToolSessionContext::new(bot)).await?;
            print_tools(&tools, format)?;
            ExitCode::SUCCESS
        }
        Command::Call { bot, tool, args } => {
            let args = parse_args(&args)?;
            let result = gateway
                .call_tool(&ToolSessionContext::new(bot), &tool, Some(args))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if outcome::is_error_result(&result) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Connections { .. } => ExitCode::SUCCESS,
    };

    backend.shutdown().await;
    Ok(code)
}

fn parse_args(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Invalid JSON arguments")? {
        Value::Object(map) => Ok(map),
        other => bail!("Arguments must be a JSON object, got {other}"),
    }
}

fn print_tools(tools: &[ToolDescriptor], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(tools)?),
        OutputFormat::Table => {
            if tools.is_empty() {
                println!("No tools available.");
                return Ok(());
            }
            let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
            println!("Found {} tool(s):\n", tools.len());
            for tool in tools {
                let summary = tool.description.lines().next().unwrap_or_default();
                println!("  {:width$}  {summary}", tool.name);
            }
        }
    }
    Ok(())
}
