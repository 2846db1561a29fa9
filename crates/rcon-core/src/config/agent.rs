//! Agent configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the tunnel agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Install directory used by `install` / `uninstall`
    #[serde(default = "default_install")]
    pub install: PathBuf,

    /// Path to the host key used for nested sessions
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// Maximum concurrent nested sessions per tunnel (0 = unlimited)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// Interactive command interpreter spawned for `shell`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Outbound connection to the broker
    pub broker: BrokerConnection,

    /// End users allowed to open nested sessions, keyed by SSH username
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
}

fn default_install() -> PathBuf {
    PathBuf::from("/opt/single-rcon")
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("hostkey")
}

fn default_max_sessions() -> u32 {
    16
}

fn default_shell() -> String {
    "sh".to_string()
}

/// How the agent reaches and authenticates to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConnection {
    /// Broker SSH address (`host:port`)
    pub address: String,

    /// Pinned broker host key, known_hosts style
    pub host_key: String,

    /// Username presented to the broker
    pub username: String,

    /// Unencrypted private key text (OpenSSH or PEM)
    pub private_key: String,

    /// Bind address sent in the forward-listen request
    #[serde(default = "default_forward_address")]
    pub forward_address: String,

    /// Port sent in the forward-listen request (0 = any)
    #[serde(default)]
    pub forward_port: u32,

    /// Connection timeout
    #[serde(with = "duration_secs", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Backoff configuration for re-dialing
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_forward_address() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

/// An end user allowed to reach the shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    /// Authorized public key (single authorized_keys line)
    pub key: String,
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
