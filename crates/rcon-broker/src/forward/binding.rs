//! Per-agent forward listener

use std::net::SocketAddr;
use std::time::Duration;

use russh::server::Handle;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use rcon_core::error::ResourceError;
use rcon_core::identity::AgentIdentity;
use rcon_core::limit::Admission;
use rcon_core::{ConcurrencyLimit, RconError};

use super::relay::{RelayEnd, RelaySession};
use super::{bind_port, resolve_bind_address};

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// A bound forward listener owned by one agent session.
///
/// Dropping the binding (or cancelling the parent token it was opened
/// with) stops the accept loop and every relay it started.
pub struct ForwardBinding {
    agent: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ForwardBinding {
    /// Check the request against the agent's pin, bind, and start accepting.
    ///
    /// `requested_address` is only used as the "connected address" reported
    /// on each forwarded channel.
    pub async fn open(
        agent: &AgentIdentity,
        requested_address: &str,
        requested_port: u32,
        handle: Handle,
        relays: ConcurrencyLimit,
        parent: &CancellationToken,
    ) -> Result<Self, RconError> {
        let port = bind_port(agent, requested_port)?;
        let addr = resolve_bind_address(agent, port).await?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ResourceError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ResourceError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let cancel = parent.child_token();
        let acceptor = Acceptor {
            agent: agent.name.clone(),
            connected_address: requested_address.to_string(),
            connected_port: u32::from(local_addr.port()),
            handle,
            relays,
            cancel: cancel.clone(),
        };
        tokio::spawn(acceptor.run(listener));

        Ok(Self {
            agent: agent.name.clone(),
            local_addr,
            cancel,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port actually bound, as reported back to the agent
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Whether a cancel request for `port` refers to this binding
    pub fn is_for_port(&self, port: u32) -> bool {
        port == u32::from(self.port())
    }

    /// Stop listening and tear down active relays
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Closing forward listener {} for {}", self.local_addr, self.agent);
            self.cancel.cancel();
        }
    }
}

impl Drop for ForwardBinding {
    fn drop(&mut self) {
        self.close();
    }
}

struct Acceptor {
    agent: String,
    connected_address: String,
    connected_port: u32,
    handle: Handle,
    relays: ConcurrencyLimit,
    cancel: CancellationToken,
}

impl Acceptor {
    async fn run(self, listener: TcpListener) {
        loop {
            let (socket, origin) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Accept failed on forward listener for {}: {}", self.agent, e);
                        tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        continue;
                    }
                }
            };

            let Some(admission) = self.relays.try_admit() else {
                tracing::warn!(
                    "Relay limit ({}) reached for {}, refusing connection from {}",
                    self.relays.max(),
                    self.agent,
                    origin
                );
                drop(socket);
                continue;
            };

            tokio::spawn(self.relay(socket, origin, admission));
        }

        tracing::debug!("Forward listener for {} stopped", self.agent);
    }

    fn relay(
        &self,
        socket: TcpStream,
        origin: SocketAddr,
        admission: Admission,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let agent = self.agent.clone();
        let connected_address = self.connected_address.clone();
        let connected_port = self.connected_port;
        let handle = self.handle.clone();
        let cancel = self.cancel.child_token();

        async move {
            let _admission = admission;

            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = handle.channel_open_forwarded_tcpip(
                    connected_address,
                    connected_port,
                    origin.ip().to_string(),
                    u32::from(origin.port()),
                ) => opened,
            };

            let channel = match opened {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!("{} refused relay channel for {}: {}", agent, origin, e);
                    return;
                }
            };

            let channel_id = channel.id();
            tracing::debug!("Relay {} <-> {} opened on {:?}", origin, agent, channel_id);

            let end = RelaySession::new(origin, socket, channel.into_stream(), cancel)
                .run()
                .await;

            let _ = handle.close(channel_id).await;

            match end {
                RelayEnd::Failed(e) => {
                    tracing::debug!("Relay {} <-> {} failed: {}", origin, agent, e)
                }
                other => tracing::debug!("Relay {} <-> {} closed: {:?}", origin, agent, other),
            }
        }
    }
}
