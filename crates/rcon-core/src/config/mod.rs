//! Configuration management for single-rcon

mod agent;
mod broker;
pub mod serde_utils;

pub use agent::{AgentConfig, BackoffConfig, BrokerConnection, UserEntry};
pub use broker::{AgentEntry, BrokerConfig};

use crate::error::ConfigError;
use std::path::Path;

/// Default broker configuration file, relative to the working directory
pub const DEFAULT_BROKER_CONFIG: &str = "broker.toml";

/// Default agent configuration file, relative to the working directory
pub const DEFAULT_AGENT_CONFIG: &str = "agent.toml";

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}
