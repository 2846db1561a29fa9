//! Per-agent SSH session handler
//!
//! The agent may authenticate, hold one forward binding and cancel it.
//! Everything else it asks for is refused: the broker never serves
//! channels of its own, and requests arriving on relay channels are
//! answered with failure.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio_util::sync::CancellationToken;

use rcon_core::error::ProtocolViolation;
use rcon_core::identity::AgentIdentity;
use rcon_core::ConcurrencyLimit;

use crate::forward::ForwardBinding;
use crate::state::BrokerState;

/// Lifecycle of an agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Established,
    Authenticated,
    Forwarding,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Established => "established",
            Self::Authenticated => "authenticated",
            Self::Forwarding => "forwarding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Handler for a single agent connection
pub struct BrokerHandler {
    /// Shared broker state
    state: Arc<BrokerState>,
    /// Peer address of the agent
    peer_addr: SocketAddr,
    phase: SessionPhase,
    /// Set after successful authentication
    agent: Option<AgentIdentity>,
    /// The session's single forward binding
    binding: Option<ForwardBinding>,
    /// Relay admission for this session
    relays: ConcurrencyLimit,
    /// Cancelled when the session ends
    cancel: CancellationToken,
}

impl BrokerHandler {
    pub fn new(state: Arc<BrokerState>, peer_addr: SocketAddr, cancel: CancellationToken) -> Self {
        tracing::info!("Session from {} {}", peer_addr, SessionPhase::Established);
        let relays = state.relay_limit();

        Self {
            state,
            peer_addr,
            phase: SessionPhase::Established,
            agent: None,
            binding: None,
            relays,
            cancel,
        }
    }

    fn label(&self) -> String {
        match &self.agent {
            Some(agent) => format!("{} ({})", agent.name, self.peer_addr),
            None => self.peer_addr.to_string(),
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::info!("Session {}: {} -> {}", self.label(), self.phase, phase);
            self.phase = phase;
        }
    }

    fn refuse_channel(&self, kind: &str) -> bool {
        tracing::warn!(
            "Session {}: {}",
            self.label(),
            ProtocolViolation::UnexpectedChannel(kind.to_string())
        );
        false
    }

    fn refuse_request(&self, channel: ChannelId, request: &str, session: &mut Session) {
        tracing::debug!(
            "Session {}: {} on {:?}",
            self.label(),
            ProtocolViolation::UnsupportedRequest(request.to_string()),
            channel
        );
        session.channel_failure(channel);
    }
}

impl Drop for BrokerHandler {
    fn drop(&mut self) {
        self.binding.take();
        self.cancel.cancel();
        self.set_phase(SessionPhase::Closed);
    }
}

#[async_trait]
impl Handler for BrokerHandler {
    type Error = anyhow::Error;

    /// Authenticate an agent by its registered name and key
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self
            .state
            .agents
            .authenticate(user, &public_key.public_key_bytes())
        {
            Ok(agent) => {
                tracing::info!(
                    "Agent {} authenticated from {} ({})",
                    agent.name,
                    self.peer_addr,
                    public_key.fingerprint()
                );
                self.agent = Some(agent.clone());
                self.set_phase(SessionPhase::Authenticated);
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!("Authentication rejected for {}: {}", self.peer_addr, e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.refuse_channel("session"))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.refuse_channel("direct-tcpip"))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.refuse_channel("forwarded-tcpip"))
    }

    /// Bind the agent's pinned listener
    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(agent) = self.agent.clone() else {
            tracing::warn!("Forward request from unauthenticated {}", self.peer_addr);
            return Ok(false);
        };

        if self.binding.is_some() {
            tracing::warn!(
                "Forward request {}:{} from {} rejected: {}",
                address,
                port,
                agent.name,
                ProtocolViolation::BindingExists
            );
            return Ok(false);
        }

        let opened = ForwardBinding::open(
            &agent,
            address,
            *port,
            session.handle(),
            self.relays.clone(),
            &self.cancel,
        )
        .await;

        match opened {
            Ok(binding) => {
                tracing::info!(
                    "Forwarding {} for {} (requested {}:{}, pinned {})",
                    binding.local_addr(),
                    agent.name,
                    address,
                    port,
                    agent.pinned_listen()
                );
                *port = u32::from(binding.port());
                self.binding = Some(binding);
                self.set_phase(SessionPhase::Forwarding);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    "Forward request {}:{} from {} rejected: {}",
                    address,
                    port,
                    agent.name,
                    e
                );
                Ok(false)
            }
        }
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.binding.take() {
            Some(binding) if binding.is_for_port(port) => {
                binding.close();
                self.set_phase(SessionPhase::Authenticated);
                Ok(true)
            }
            other => {
                self.binding = other;
                tracing::warn!(
                    "Session {}: cancel for unknown forward {}:{}",
                    self.label(),
                    address,
                    port
                );
                Ok(false)
            }
        }
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, "pty-req", session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, "shell", session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, "exec", session);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, &format!("subsystem {}", name), session);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, &format!("env {}", variable_name), session);
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, "x11-req", session);
        Ok(())
    }

    /// russh also answers `false` with a global failure, which clients ignore
    async fn agent_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.refuse_request(channel, "auth-agent-req", session);
        Ok(false)
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_request(channel, &format!("signal {:?}", signal), session);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Relay channel EOF: {:?}", channel);
        Ok(())
    }
}
