//! single-rcon agent
//!
//! Dials the broker, holds the pinned forward, and serves a shell to end
//! users whose connections arrive through the tunnel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcon_agent::install::Installer;
use rcon_agent::{Agent, AgentState};
use rcon_core::config::{self, AgentConfig};
use rcon_core::identity::host_key;
use rcon_core::runtime::cancel_on_signal;

#[derive(Parser)]
#[command(name = "rcon-agent")]
#[command(about = "single-rcon agent")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = config::DEFAULT_AGENT_CONFIG)]
    config: PathBuf,

    /// Run in foreground with verbose output
    #[arg(short, long, global = true)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect once, take the forward, release it and exit
    Check,
    /// Keep the tunnel up (default)
    Run,
    /// Install as a systemd service
    Install,
    /// Remove the systemd service and installed files
    Uninstall,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AgentConfig = config::load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            let agent = build_agent(config)?;
            let port = agent.check().await?;
            println!("OK: broker forwarding port {}", port);
        }
        Command::Run => {
            let agent = build_agent(config)?;

            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));

            agent.run(cancel).await?;
            tracing::info!("Agent shutdown complete");
        }
        Command::Install => {
            let executable =
                std::env::current_exe().context("Failed to locate the running executable")?;
            Installer::systemd(&config).install(&executable, &args.config)?;
            println!("Installed to {:?}", config.install);
        }
        Command::Uninstall => {
            Installer::systemd(&config).uninstall()?;
            println!("Uninstalled from {:?}", config.install);
        }
    }

    Ok(())
}

fn build_agent(config: AgentConfig) -> Result<Agent> {
    let host_key = host_key::load_or_create(&config.host_key_path)?;
    let state = AgentState::new(config, host_key).context("Invalid agent configuration")?;
    if state.users.is_empty() {
        tracing::warn!("No users configured - all nested sessions will be rejected");
    } else {
        tracing::info!("Loaded {} users", state.users.len());
    }

    Ok(Agent::new(Arc::new(state))?)
}
