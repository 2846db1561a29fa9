//! Broker configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for the rendezvous broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the SSH server binds to
    pub listen: String,

    /// Path to the host key file
    pub host_key_path: PathBuf,

    /// Maximum simultaneous relays per agent session (0 = unlimited)
    pub max_relays_per_agent: u32,

    /// Registered agents, keyed by SSH username
    pub agents: BTreeMap<String, AgentEntry>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2222".to_string(),
            host_key_path: PathBuf::from("hostkey"),
            max_relays_per_agent: 64,
            agents: BTreeMap::new(),
        }
    }
}

/// A registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Authorized public key (single authorized_keys line)
    pub key: String,

    /// Pinned forward listen address (`host:port`)
    pub listen: String,
}
