//! Agent lifecycle: keep one tunnel up, re-dialing after transport loss

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rcon_core::error::{RconError, TransportError};

use crate::state::AgentState;
use crate::tunnel::{ExponentialBackoff, TunnelConnector};

/// The long-running agent
pub struct Agent {
    state: Arc<AgentState>,
    connector: TunnelConnector,
}

impl Agent {
    pub fn new(state: Arc<AgentState>) -> Result<Self, RconError> {
        let connector = TunnelConnector::new(&state.config.broker)?;
        Ok(Self { state, connector })
    }

    /// Keep the tunnel up until `shutdown` fires or a fatal error occurs
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), RconError> {
        let mut backoff = ExponentialBackoff::from_config(&self.state.config.broker.backoff);

        loop {
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                attempt = self.connector.connect(Arc::clone(&self.state)) => attempt,
            };

            match attempt {
                Ok(tunnel) => {
                    backoff.reset();
                    let shutting_down = tokio::select! {
                        _ = shutdown.cancelled() => true,
                        _ = tunnel.closed() => false,
                    };

                    if shutting_down {
                        tracing::info!("Shutting down tunnel");
                        tunnel.disconnect().await;
                        return Ok(());
                    }
                    tracing::warn!("Tunnel to {} lost", self.connector.address());
                }
                Err(e) if is_fatal(&e) => {
                    tracing::error!("Giving up on {}: {}", self.connector.address(), e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Connection to {} failed: {}", self.connector.address(), e);
                }
            }

            let delay = backoff.next_delay();
            tracing::info!("Reconnecting in {:?} (attempt {})", delay, backoff.attempt());
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect once, take and release the forward, and disconnect.
    ///
    /// Returns the port the broker bound.
    pub async fn check(&self) -> Result<u32, RconError> {
        let mut tunnel = self.connector.connect(Arc::clone(&self.state)).await?;
        let port = tunnel.bound_port();
        tunnel.cancel_forward().await?;
        tunnel.disconnect().await;
        Ok(port)
    }
}

/// Errors a re-dial cannot fix
pub fn is_fatal(err: &RconError) -> bool {
    matches!(
        err,
        RconError::Transport(
            TransportError::AuthRejected
                | TransportError::HostKeyRejected
                | TransportError::ForwardRejected(_)
        ) | RconError::Config(_)
            | RconError::Resource(_)
    )
}
