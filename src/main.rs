//! mcp-relay: runs one chat request against a set of MCP servers.
//!
//! ## Commands
//!
//! - `chat`: read a `{ messages, servers }` request, stream event frames as NDJSON
//! - `probe`: read a `{ servers }` request, print each server's status and tools

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mcp_relay::agent_core::{ChatRequest, Termination};
use mcp_relay::commands::{self, ProbeRequest};
use mcp_relay::inference::config::{find_config_path, load_config, RelayConfig};

#[derive(Parser)]
#[command(name = "mcp-relay", version)]
#[command(about = "Multi-server MCP tool orchestration for LLM chat agents")]
struct Cli {
    /// Config file (defaults to $MCP_RELAY_CONFIG, then relay.yaml found upward)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for relay.log (defaults to the platform data directory)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one chat request and stream event frames to stdout
    Chat {
        /// Request file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Report which servers connect and the tools they expose
    Probe {
        /// Request file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(mcp_relay::data_dir);
    mcp_relay::init_tracing(&log_dir)
        .with_context(|| format!("failed to initialize logging in {}", log_dir.display()))?;

    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat { input } => run_chat(&config, input.as_deref()).await,
        Commands::Probe { input } => run_probe(&config, input.as_deref()).await,
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<RelayConfig> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let path = find_config_path(explicit, &cwd).context("no configuration found")?;
    load_config(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read request from stdin")?;
            Ok(buf)
        }
    }
}

async fn run_chat(config: &RelayConfig, input: Option<&Path>) -> Result<()> {
    let request: ChatRequest =
        serde_json::from_str(&read_input(input)?).context("request is not a valid chat request")?;
    let driver = commands::build_driver(config).context("failed to build model client")?;

    let (mut events, handle) = commands::start_chat(driver, request);

    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let line = serde_json::to_string(&event).context("failed to encode event frame")?;
        let mut out = stdout.lock();
        writeln!(out, "{line}").context("failed to write event frame")?;
        out.flush().context("failed to flush stdout")?;
    }

    let termination = handle.await.context("chat task panicked")?;
    if let Termination::Fatal(err) = termination {
        anyhow::bail!(err);
    }
    Ok(())
}

async fn run_probe(config: &RelayConfig, input: Option<&Path>) -> Result<()> {
    let request: ProbeRequest =
        serde_json::from_str(&read_input(input)?).context("request is not a valid probe request")?;

    let probes = commands::probe(&config.orchestration, &request.servers).await;

    let json = serde_json::to_string_pretty(&probes).context("failed to encode probe results")?;
    println!("{json}");
    Ok(())
}
