//! Nested SSH sessions served on forwarded channels

mod handler;
mod process;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub use handler::{ShellHandler, ShellPhase, ShellSessionState};
pub use process::{PtyRequest, ShellProcess};

/// Run one nested session over `stream` until it ends or `cancel` fires
pub async fn serve<S>(
    config: Arc<russh::server::Config>,
    stream: S,
    handler: ShellHandler,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = russh::server::run_stream(config, stream, handler).await?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = session => result,
    }
}
