//! Broker state shared by every agent session

use rcon_core::config::BrokerConfig;
use rcon_core::error::ConfigError;
use rcon_core::identity::{AgentIdentity, IdentityTable};
use rcon_core::ConcurrencyLimit;

/// Read-only state built once at startup
#[derive(Debug)]
pub struct BrokerState {
    /// Broker configuration
    pub config: BrokerConfig,
    /// Registered agents
    pub agents: IdentityTable<AgentIdentity>,
}

impl BrokerState {
    /// Build state from configuration, parsing every agent entry
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        let agents = IdentityTable::from_broker_config(&config)?;
        Ok(Self { config, agents })
    }

    /// A fresh relay limit for one agent session
    pub fn relay_limit(&self) -> ConcurrencyLimit {
        ConcurrencyLimit::new(self.config.max_relays_per_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcon_core::config::AgentEntry;

    #[test]
    fn test_state_from_empty_config() {
        let state = BrokerState::new(BrokerConfig::default()).unwrap();
        assert!(state.agents.is_empty());
        assert_eq!(state.relay_limit().max(), 64);
    }

    #[test]
    fn test_invalid_agent_key_fails_startup() {
        let mut config = BrokerConfig::default();
        config.agents.insert(
            "office".into(),
            AgentEntry {
                key: "not a key".into(),
                listen: "0.0.0.0:10022".into(),
            },
        );

        assert!(matches!(
            BrokerState::new(config),
            Err(ConfigError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_relay_limits_are_per_session() {
        let mut config = BrokerConfig::default();
        config.max_relays_per_agent = 1;
        let state = BrokerState::new(config).unwrap();

        let first = state.relay_limit();
        let second = state.relay_limit();
        let _held = first.try_admit().unwrap();
        assert!(first.try_admit().is_none());
        assert!(second.try_admit().is_some());
    }
}
