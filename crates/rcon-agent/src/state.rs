//! Agent state shared by the tunnel and every nested session

use std::sync::Arc;

use russh_keys::key::KeyPair;
use tokio_util::sync::CancellationToken;

use rcon_core::config::AgentConfig;
use rcon_core::error::ConfigError;
use rcon_core::identity::{EndUserIdentity, IdentityTable};
use rcon_core::limit::Admission;
use rcon_core::runtime::ssh_server_config;
use rcon_core::ConcurrencyLimit;

use crate::shell::ShellHandler;

/// Read-only state built once at startup
pub struct AgentState {
    /// Agent configuration
    pub config: AgentConfig,
    /// End users allowed to open nested sessions
    pub users: Arc<IdentityTable<EndUserIdentity>>,
    /// Server configuration for nested sessions
    shell_config: Arc<russh::server::Config>,
    /// Nested session admission
    sessions: ConcurrencyLimit,
}

impl AgentState {
    /// Build state from configuration and the agent's host key
    pub fn new(config: AgentConfig, host_key: KeyPair) -> Result<Self, ConfigError> {
        let users = Arc::new(IdentityTable::from_agent_config(&config)?);
        let sessions = ConcurrencyLimit::new(config.max_sessions);

        Ok(Self {
            config,
            users,
            shell_config: ssh_server_config(host_key),
            sessions,
        })
    }

    pub fn shell_config(&self) -> Arc<russh::server::Config> {
        Arc::clone(&self.shell_config)
    }

    /// Try to admit one more nested session
    pub fn admit_session(&self) -> Option<Admission> {
        self.sessions.try_admit()
    }

    pub fn session_limit(&self) -> u32 {
        self.sessions.max()
    }

    /// Handler for one nested session from `origin`
    pub fn shell_handler(&self, origin: String, cancel: CancellationToken) -> ShellHandler {
        ShellHandler::new(
            Arc::clone(&self.users),
            self.config.shell.clone(),
            origin,
            cancel,
        )
    }
}

