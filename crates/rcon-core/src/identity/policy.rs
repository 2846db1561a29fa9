//! Peer authentication policy
//!
//! A claimed name is looked up in a static table and the presented key is
//! compared byte-for-byte against the key on record. The tables are built
//! once at startup and only read afterwards, so they can be shared behind
//! an `Arc` without locking.

use std::collections::HashMap;

use crate::config::{AgentConfig, BrokerConfig};
use crate::error::{ConfigError, IdentityError};

use super::authorized_key::AuthorizedKey;

/// An entry that can be authenticated by public key
pub trait Identity {
    fn name(&self) -> &str;
    fn authorized_key(&self) -> &AuthorizedKey;
}

/// A registered agent as seen by the broker
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub name: String,
    pub authorized_key: AuthorizedKey,
    /// Host part of the pinned forward listen address
    pub pinned_host: String,
    /// Port part of the pinned forward listen address
    pub pinned_port: u16,
}

impl AgentIdentity {
    /// Pinned listen address as configured
    pub fn pinned_listen(&self) -> String {
        format!("{}:{}", self.pinned_host, self.pinned_port)
    }
}

impl Identity for AgentIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorized_key(&self) -> &AuthorizedKey {
        &self.authorized_key
    }
}

/// An end user allowed to open a nested session on the agent
#[derive(Debug, Clone)]
pub struct EndUserIdentity {
    pub name: String,
    pub authorized_key: AuthorizedKey,
}

impl Identity for EndUserIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorized_key(&self) -> &AuthorizedKey {
        &self.authorized_key
    }
}

/// Static name → identity table
#[derive(Debug)]
pub struct IdentityTable<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for IdentityTable<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Identity> IdentityTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity, replacing any previous entry with the same name
    pub fn insert(&mut self, identity: T) {
        self.entries.insert(identity.name().to_string(), identity);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decide whether `presented` (canonical wire encoding) may act as `claimed`
    pub fn authenticate(&self, claimed: &str, presented: &[u8]) -> Result<&T, IdentityError> {
        let identity = self
            .entries
            .get(claimed)
            .ok_or_else(|| IdentityError::UnknownIdentity(claimed.to_string()))?;

        if !identity.authorized_key().matches(presented) {
            return Err(IdentityError::KeyMismatch(claimed.to_string()));
        }

        Ok(identity)
    }
}

impl IdentityTable<AgentIdentity> {
    /// Build the agent table from broker configuration
    pub fn from_broker_config(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let mut table = Self::new();

        for (name, entry) in &config.agents {
            let authorized_key =
                AuthorizedKey::parse(&entry.key).map_err(|e| ConfigError::InvalidKey {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let (pinned_host, pinned_port) = split_host_port(&entry.listen).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "agent {}: listen address {:?} is not host:port",
                    name, entry.listen
                ))
            })?;

            tracing::debug!("Agent {} registered with {}", name, authorized_key);
            table.insert(AgentIdentity {
                name: name.clone(),
                authorized_key,
                pinned_host,
                pinned_port,
            });
        }

        Ok(table)
    }
}

impl IdentityTable<EndUserIdentity> {
    /// Build the end-user table from agent configuration
    pub fn from_agent_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let mut table = Self::new();

        for (name, entry) in &config.users {
            let authorized_key =
                AuthorizedKey::parse(&entry.key).map_err(|e| ConfigError::InvalidKey {
                    name: name.clone(),
                    message: e.to_string(),
                })?;

            tracing::debug!("User {} registered with {}", name, authorized_key);
            table.insert(EndUserIdentity {
                name: name.clone(),
                authorized_key,
            });
        }

        Ok(table)
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentEntry, BrokerConfig};
    use russh_keys::key::KeyPair;
    use russh_keys::PublicKeyBase64;

    fn key_line() -> (String, Vec<u8>) {
        let key = KeyPair::generate_ed25519().unwrap();
        let public = key.clone_public_key().unwrap();
        (
            format!("{} {}", public.name(), public.public_key_base64()),
            public.public_key_bytes(),
        )
    }

    fn broker_config(entries: &[(&str, &str, &str)]) -> BrokerConfig {
        let mut config = BrokerConfig::default();
        for (name, key, listen) in entries {
            config.agents.insert(
                name.to_string(),
                AgentEntry {
                    key: key.to_string(),
                    listen: listen.to_string(),
                },
            );
        }
        config
    }

    fn agent_table(entries: &[(&str, &str, &str)]) -> IdentityTable<AgentIdentity> {
        IdentityTable::<AgentIdentity>::from_broker_config(&broker_config(entries)).unwrap()
    }

    #[test]
    fn test_unknown_identity_rejected() {
        let (line, blob) = key_line();
        let table = agent_table(&[("office", &line, "0.0.0.0:10022")]);

        for name in ["", "Office", "office ", "ghost"] {
            assert_eq!(
                table.authenticate(name, &blob).unwrap_err(),
                IdentityError::UnknownIdentity(name.to_string())
            );
        }
    }

    #[test]
    fn test_accepts_exact_key_only() {
        let (line, blob) = key_line();
        let (_, other_blob) = key_line();
        let table = agent_table(&[("office", &line, "0.0.0.0:10022")]);

        let agent = table.authenticate("office", &blob).unwrap();
        assert_eq!(agent.pinned_port, 10022);
        assert_eq!(agent.pinned_host, "0.0.0.0");

        assert_eq!(
            table.authenticate("office", &other_blob).unwrap_err(),
            IdentityError::KeyMismatch("office".into())
        );
    }

    #[test]
    fn test_differently_encoded_key_rejected() {
        let (line, blob) = key_line();
        let table = agent_table(&[("office", &line, "0.0.0.0:10022")]);

        // Same key material with a trailing byte is a different encoding.
        let mut padded = blob.clone();
        padded.push(0);
        assert!(table.authenticate("office", &padded).is_err());
    }

    #[test]
    fn test_key_belongs_to_its_name_only() {
        let (office_line, office_blob) = key_line();
        let (lab_line, _) = key_line();
        let table = agent_table(&[
            ("office", &office_line, "0.0.0.0:10022"),
            ("lab", &lab_line, "0.0.0.0:10023"),
        ]);

        assert!(table.authenticate("office", &office_blob).is_ok());
        assert_eq!(
            table.authenticate("lab", &office_blob).unwrap_err(),
            IdentityError::KeyMismatch("lab".into())
        );
    }

    #[test]
    fn test_invalid_config_entries() {
        let (line, _) = key_line();

        let bad_key = IdentityTable::<AgentIdentity>::from_broker_config(&broker_config(&[(
            "office",
            "ssh-ed25519 nope",
            "0.0.0.0:10022",
        )]));
        assert!(matches!(bad_key, Err(ConfigError::InvalidKey { .. })));

        let bad_listen = IdentityTable::<AgentIdentity>::from_broker_config(&broker_config(&[(
            "office", &line, "0.0.0.0",
        )]));
        assert!(matches!(bad_listen, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("0.0.0.0:22"), Some(("0.0.0.0".into(), 22)));
        assert_eq!(split_host_port("[::1]:2222"), Some(("::1".into(), 2222)));
        assert_eq!(split_host_port("localhost:0"), Some(("localhost".into(), 0)));
        assert_eq!(split_host_port("localhost"), None);
        assert_eq!(split_host_port("localhost:99999"), None);
    }
}
