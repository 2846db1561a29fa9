//! Byte relay between an accepted TCP connection and a forwarded channel

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Why a relay stopped
#[derive(Debug)]
pub enum RelayEnd {
    /// The TCP client stopped sending
    OriginClosed,
    /// The agent side stopped sending
    AgentClosed,
    /// Either direction failed
    Failed(std::io::Error),
    /// The owning session or binding went away
    Cancelled,
}

/// One relayed TCP connection.
///
/// Both directions are copied concurrently. Whichever direction finishes
/// first ends the relay, and both halves are dropped together; half-close
/// is not carried across.
pub struct RelaySession<T, C> {
    origin: SocketAddr,
    tcp: T,
    channel: C,
    cancel: CancellationToken,
}

impl<T, C> RelaySession<T, C>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(origin: SocketAddr, tcp: T, channel: C, cancel: CancellationToken) -> Self {
        Self {
            origin,
            tcp,
            channel,
            cancel,
        }
    }

    /// Copy bytes until either side closes or the relay is cancelled
    pub async fn run(self) -> RelayEnd {
        let (mut tcp_read, mut tcp_write) = tokio::io::split(self.tcp);
        let (mut channel_read, mut channel_write) = tokio::io::split(self.channel);

        tokio::select! {
            _ = self.cancel.cancelled() => RelayEnd::Cancelled,
            result = tokio::io::copy(&mut tcp_read, &mut channel_write) => match result {
                Ok(bytes) => {
                    tracing::trace!("{} -> agent: {} bytes", self.origin, bytes);
                    RelayEnd::OriginClosed
                }
                Err(e) => RelayEnd::Failed(e),
            },
            result = tokio::io::copy(&mut channel_read, &mut tcp_write) => match result {
                Ok(bytes) => {
                    tracing::trace!("agent -> {}: {} bytes", self.origin, bytes);
                    RelayEnd::AgentClosed
                }
                Err(e) => RelayEnd::Failed(e),
            },
        }
    }
}
