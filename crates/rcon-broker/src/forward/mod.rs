//! Forward-listen handling
//!
//! An agent may hold at most one binding, and only on its pinned listen
//! address. The address and port the agent asks for are never used to
//! choose where to bind; they are only checked against the pin and echoed
//! back as channel metadata.

mod binding;
mod relay;

use std::net::SocketAddr;

use rcon_core::error::{ProtocolViolation, ResourceError};
use rcon_core::identity::AgentIdentity;

pub use binding::ForwardBinding;
pub use relay::{RelayEnd, RelaySession};

/// Decide which port to bind for a forward-listen request.
///
/// A request for port 0 means "any port" and yields 0, letting the OS pick
/// an ephemeral port on the pinned host. Any other request must name the
/// pinned port exactly.
pub fn bind_port(agent: &AgentIdentity, requested: u32) -> Result<u16, ProtocolViolation> {
    if requested == 0 {
        return Ok(0);
    }

    if requested == u32::from(agent.pinned_port) {
        Ok(agent.pinned_port)
    } else {
        Err(ProtocolViolation::ForbiddenPort {
            requested,
            pinned: agent.pinned_port,
        })
    }
}

/// Resolve the pinned host for binding on `port`
pub async fn resolve_bind_address(
    agent: &AgentIdentity,
    port: u16,
) -> Result<SocketAddr, ResourceError> {
    let host = agent.pinned_host.as_str();
    let addr = format!("{}:{}", host, port);

    let mut resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ResourceError::AddressResolution {
            addr: addr.clone(),
            source,
        })?;

    resolved
        .next()
        .ok_or_else(|| ResourceError::AddressResolution {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcon_core::identity::AuthorizedKey;
    use russh_keys::key::KeyPair;
    use russh_keys::PublicKeyBase64;

    fn agent(host: &str, port: u16) -> AgentIdentity {
        let key = KeyPair::generate_ed25519().unwrap();
        let public = key.clone_public_key().unwrap();
        let line = format!("{} {}", public.name(), public.public_key_base64());
        AgentIdentity {
            name: "office".into(),
            authorized_key: AuthorizedKey::parse(&line).unwrap(),
            pinned_host: host.into(),
            pinned_port: port,
        }
    }

    #[test]
    fn test_pinned_port_allowed() {
        assert_eq!(bind_port(&agent("0.0.0.0", 10022), 10022), Ok(10022));
    }

    #[test]
    fn test_any_port_sentinel() {
        assert_eq!(bind_port(&agent("0.0.0.0", 10022), 0), Ok(0));
    }

    #[test]
    fn test_other_ports_forbidden() {
        let agent = agent("0.0.0.0", 10022);
        for requested in [1, 22, 10021, 10023, 65535, 75558] {
            assert_eq!(
                bind_port(&agent, requested),
                Err(ProtocolViolation::ForbiddenPort {
                    requested,
                    pinned: 10022
                })
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_pinned_host() {
        let addr = resolve_bind_address(&agent("127.0.0.1", 10022), 10022)
            .await
            .unwrap();
        assert_eq!(addr, "127.0.0.1:10022".parse().unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_a_resource_error() {
        let result = resolve_bind_address(&agent("no such host.invalid", 10022), 10022).await;
        assert!(matches!(
            result,
            Err(ResourceError::AddressResolution { .. })
        ));
    }
}
