//! single-rcon broker daemon
//!
//! Accepts reverse tunnels from registered agents and relays TCP
//! connections on each agent's pinned port back through its tunnel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use russh_keys::PublicKeyBase64;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcon_broker::{BrokerServer, BrokerState};
use rcon_core::config::{self, BrokerConfig};
use rcon_core::identity::host_key;
use rcon_core::runtime::cancel_on_signal;

#[derive(Parser)]
#[command(name = "rcon-broker")]
#[command(about = "single-rcon broker daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = config::DEFAULT_BROKER_CONFIG)]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
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

    let config: BrokerConfig = config::load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    let bind_addr = args.bind.clone().unwrap_or_else(|| config.listen.clone());

    let host_key = host_key::load_or_create(&config.host_key_path)?;
    let public = host_key.clone_public_key()?;
    tracing::info!(
        "Host key {} {} ({})",
        public.name(),
        public.public_key_base64(),
        public.fingerprint()
    );

    let state = Arc::new(BrokerState::new(config).context("Invalid agent table")?);
    if state.agents.is_empty() {
        tracing::warn!("No agents configured - all connections will be rejected");
    } else {
        tracing::info!("Loaded {} agents", state.agents.len());
    }

    let listener = BrokerServer::bind(&bind_addr).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let server = BrokerServer::new(host_key, state, cancel);
    server.serve(listener).await?;

    tracing::info!("Broker shutdown complete");
    Ok(())
}
