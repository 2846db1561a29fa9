//! SSH server listener
//!
//! Accepts agent connections and runs one session task per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use rcon_core::error::ResourceError;
use rcon_core::runtime::ssh_server_config;

use super::handler::BrokerHandler;
use crate::state::BrokerState;

/// SSH server that listens for agent tunnels
pub struct BrokerServer {
    /// russh server configuration
    ssh_config: Arc<russh::server::Config>,
    /// Shared broker state
    state: Arc<BrokerState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl BrokerServer {
    pub fn new(host_key: KeyPair, state: Arc<BrokerState>, cancel: CancellationToken) -> Self {
        Self {
            ssh_config: ssh_server_config(host_key),
            state,
            cancel,
        }
    }

    /// Bind the primary listen socket
    pub async fn bind(bind_addr: &str) -> Result<TcpListener, ResourceError> {
        TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ResourceError::Bind {
                addr: bind_addr.to_string(),
                source,
            })
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = Self::bind(bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve agents on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Broker listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Broker shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.ssh_config);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let handler = BrokerHandler::new(state, peer_addr, cancel.child_token());

            let session = match russh::server::run_stream(config, socket, handler).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Session with {} cancelled", peer_addr);
                    return;
                }
                result = session => result,
            };

            match result {
                Ok(()) => tracing::debug!("Connection from {} closed", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}
