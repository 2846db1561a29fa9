//! Outbound SSH tunnel to the broker
//!
//! Dials the broker, verifies its pinned host key, authenticates and
//! requests the agent's single forward. Forwarded channels opened by the
//! broker afterwards are each handed to a nested session task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use tokio_util::sync::CancellationToken;

use rcon_core::config::BrokerConnection;
use rcon_core::error::{ConfigError, RconError, TransportError};
use rcon_core::identity::{decode_private_key, AuthorizedKey};

use crate::shell;
use crate::state::AgentState;

/// Establishes the outbound tunnel to the broker
pub struct TunnelConnector {
    /// Broker connection settings
    config: BrokerConnection,
    /// Agent's private key
    key: Arc<KeyPair>,
    /// Pinned broker host key
    host_key: AuthorizedKey,
}

impl TunnelConnector {
    /// Parse the configured keys
    pub fn new(config: &BrokerConnection) -> Result<Self, ConfigError> {
        let key = decode_private_key("broker.private_key", &config.private_key)?;
        let host_key =
            AuthorizedKey::parse(&config.host_key).map_err(|e| ConfigError::InvalidKey {
                name: "broker.host_key".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            config: config.clone(),
            key: Arc::new(key),
            host_key,
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Dial, authenticate and request the forward
    pub async fn connect(&self, state: Arc<AgentState>) -> Result<ActiveTunnel, RconError> {
        let closed = CancellationToken::new();
        let host_key_rejected = Arc::new(AtomicBool::new(false));
        let handler = TunnelHandler {
            expected_host_key: self.host_key.clone(),
            host_key_rejected: Arc::clone(&host_key_rejected),
            state,
            closed: closed.clone(),
        };

        tracing::debug!("Connecting to {}", self.config.address);
        let connecting = client::connect(
            Arc::new(client::Config::default()),
            self.config.address.as_str(),
            handler,
        );
        let mut handle = match tokio::time::timeout(self.config.connect_timeout, connecting).await {
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "timed out connecting to {}",
                    self.config.address
                ))
                .into())
            }
            Ok(Err(_)) if host_key_rejected.load(Ordering::SeqCst) => {
                return Err(TransportError::HostKeyRejected.into())
            }
            Ok(Err(e)) => {
                return Err(
                    TransportError::Connect(format!("{}: {}", self.config.address, e)).into(),
                )
            }
            Ok(Ok(handle)) => handle,
        };

        tracing::debug!("Authenticating as '{}'", self.config.username);
        let authenticated = handle
            .authenticate_publickey(&self.config.username, Arc::clone(&self.key))
            .await
            .map_err(|e| TransportError::Connect(format!("authentication failed: {}", e)))?;
        if !authenticated {
            return Err(TransportError::AuthRejected.into());
        }

        let assigned = handle
            .tcpip_forward(self.config.forward_address.clone(), self.config.forward_port)
            .await
            .map_err(|e| {
                TransportError::ForwardRejected(format!(
                    "{}:{}: {}",
                    self.config.forward_address, self.config.forward_port, e
                ))
            })?;
        let bound_port = if self.config.forward_port == 0 {
            assigned
        } else {
            self.config.forward_port
        };

        tracing::info!(
            "Tunnel to {} up, broker forwarding port {}",
            self.config.address,
            bound_port
        );

        Ok(ActiveTunnel {
            handle,
            closed,
            forward_address: self.config.forward_address.clone(),
            bound_port,
        })
    }
}

/// An established tunnel holding its forward
pub struct ActiveTunnel {
    handle: Handle<TunnelHandler>,
    /// Cancelled when the connection ends
    closed: CancellationToken,
    forward_address: String,
    bound_port: u32,
}

impl ActiveTunnel {
    /// Port the broker bound for this agent
    pub fn bound_port(&self) -> u32 {
        self.bound_port
    }

    /// Resolves once the connection to the broker is gone
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Give the forward back to the broker
    pub async fn cancel_forward(&mut self) -> Result<(), RconError> {
        self.handle
            .cancel_tcpip_forward(self.forward_address.clone(), self.bound_port)
            .await
            .map_err(|e| TransportError::ForwardRejected(format!("cancel failed: {}", e)).into())
    }

    /// Close the connection
    pub async fn disconnect(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect failed: {}", e);
        }
        self.closed.cancel();
    }
}

/// Client-side handler for the tunnel connection
struct TunnelHandler {
    expected_host_key: AuthorizedKey,
    host_key_rejected: Arc<AtomicBool>,
    state: Arc<AgentState>,
    /// Parent of every nested session; cancelled on drop
    closed: CancellationToken,
}

impl Drop for TunnelHandler {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl client::Handler for TunnelHandler {
    type Error = anyhow::Error;

    /// Accept only the pinned broker key
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self
            .expected_host_key
            .matches(&server_public_key.public_key_bytes())
        {
            tracing::debug!("Broker host key verified ({})", server_public_key.fingerprint());
            return Ok(true);
        }

        tracing::error!(
            "Broker host key mismatch: expected {}, got {}",
            self.expected_host_key.fingerprint(),
            server_public_key.fingerprint()
        );
        self.host_key_rejected.store(true, Ordering::SeqCst);
        Ok(false)
    }

    /// Serve a nested session on each relayed connection
    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _connected_address: &str,
        _connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let origin = format!("{}:{}", originator_address, originator_port);

        let Some(admission) = self.state.admit_session() else {
            tracing::warn!(
                "Session limit ({}) reached, refusing connection from {}",
                self.state.session_limit(),
                origin
            );
            let _ = channel.close().await;
            return Ok(());
        };

        tracing::debug!("Nested session from {} on {:?}", origin, channel.id());
        let cancel = self.closed.child_token();
        let handler = self.state.shell_handler(origin.clone(), cancel.clone());
        let config = self.state.shell_config();

        tokio::spawn(async move {
            let _admission = admission;
            if let Err(e) = shell::serve(config, channel.into_stream(), handler, cancel).await {
                tracing::debug!("Nested session from {} ended: {}", origin, e);
            }
        });

        Ok(())
    }
}
