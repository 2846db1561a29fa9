//! Shell processes attached to a session channel
//!
//! A shell is started before the channel is touched, so a failed spawn
//! leaves the channel usable. Once attached, each direction is pumped by
//! its own task and a final task waits for the child, then reports its
//! exit status and closes the channel.

use std::io::{Read, Write};
use std::process::Stdio;
use std::time::Duration;

use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId, CryptoVec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rcon_core::error::ResourceError;
use rcon_core::{ExitCode, PtyDimensions};

use crate::pty::{self, PtyControl, PtyProcess};

/// Chunks buffered between the blocking pty side and the channel
const PTY_CHANNEL_CAPACITY: usize = 64;

/// How long to let buffered output drain after the child exits
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// SSH extended data type for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Terminal parameters from a `pty-req`
#[derive(Debug, Clone)]
pub struct PtyRequest {
    pub term: String,
    pub dims: PtyDimensions,
}

/// A started but not yet attached shell
pub enum ShellProcess {
    Pty(PtyProcess),
    Piped(tokio::process::Child),
}

impl ShellProcess {
    /// Start `program`, on a pty when one was requested
    pub fn spawn(program: &str, pty: Option<&PtyRequest>) -> Result<Self, ResourceError> {
        match pty {
            Some(request) => PtyProcess::spawn(program, &request.term, request.dims).map(Self::Pty),
            None => {
                let child = tokio::process::Command::new(program)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| ResourceError::Spawn(format!("{}: {}", program, e)))?;
                tracing::debug!("Spawned {} without pty (pid {:?})", program, child.id());
                Ok(Self::Piped(child))
            }
        }
    }

    /// Wire the process to `channel` and start its I/O and exit tasks.
    ///
    /// Returns the resize control for pty shells.
    pub fn attach(
        self,
        channel: Channel<Msg>,
        handle: Handle,
        cancel: CancellationToken,
    ) -> Option<PtyControl> {
        match self {
            Self::Pty(process) => Some(attach_pty(process, channel, handle, cancel)),
            Self::Piped(child) => {
                attach_piped(child, channel, handle, cancel);
                None
            }
        }
    }
}

fn attach_pty(
    process: PtyProcess,
    channel: Channel<Msg>,
    handle: Handle,
    cancel: CancellationToken,
) -> PtyControl {
    let PtyProcess {
        control,
        child,
        reader,
        writer,
    } = process;

    let channel_id = channel.id();
    let (mut channel_read, mut channel_write) = tokio::io::split(channel.into_stream());

    // pty -> channel
    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(PTY_CHANNEL_CAPACITY);
    spawn_pty_reader(reader, output_tx);
    let output = tokio::spawn(async move {
        while let Some(chunk) = output_rx.recv().await {
            if channel_write.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = channel_write.flush().await;
    });

    // channel -> pty
    let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(PTY_CHANNEL_CAPACITY);
    spawn_pty_writer(writer, input_rx);
    let input_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let read = tokio::select! {
                _ = input_cancel.cancelled() => break,
                read = channel_read.read(&mut buf) => read,
            };
            match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // exit
    let mut killer = child.clone_killer();
    let wait = tokio::task::spawn_blocking(move || pty::wait_exit(child));
    tokio::spawn(async move {
        let code = tokio::select! {
            joined = wait => joined.ok().flatten(),
            _ = cancel.cancelled() => {
                tracing::debug!("Killing pty shell on {:?}", channel_id);
                let _ = killer.kill();
                return;
            }
        };
        report_exit(&handle, channel_id, code, vec![output]).await;
    });

    control
}

fn attach_piped(
    mut child: tokio::process::Child,
    channel: Channel<Msg>,
    handle: Handle,
    cancel: CancellationToken,
) {
    let channel_id = channel.id();
    let (mut channel_read, mut channel_write) = tokio::io::split(channel.into_stream());
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // channel -> stdin; dropping stdin delivers EOF to the shell
    if let Some(mut stdin) = stdin {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut channel_read, &mut stdin).await;
        });
    }

    // stdout -> channel data
    let output = tokio::spawn(async move {
        if let Some(mut stdout) = stdout {
            let _ = tokio::io::copy(&mut stdout, &mut channel_write).await;
            let _ = channel_write.flush().await;
        }
    });

    // stderr -> extended data
    let errors_handle = handle.clone();
    let errors = tokio::spawn(async move {
        let Some(mut stderr) = stderr else {
            return;
        };
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let data = CryptoVec::from_slice(&buf[..n]);
                    if errors_handle
                        .extended_data(channel_id, SSH_EXTENDED_DATA_STDERR, data)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            tracing::debug!("Killing shell on {:?}", channel_id);
            let _ = child.start_kill();
            let _ = child.wait().await;
            return;
        };

        let code = ExitCode::from_status_code(status.ok().and_then(|s| s.code()));
        report_exit(&handle, channel_id, code, vec![output, errors]).await;
    });
}

/// Drain output, then send exit status (when known), EOF and close
async fn report_exit(
    handle: &Handle,
    channel_id: ChannelId,
    code: Option<ExitCode>,
    pumps: Vec<JoinHandle<()>>,
) {
    let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
        for pump in pumps {
            let _ = pump.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!("Output on {:?} still pending after exit", channel_id);
    }

    match code {
        Some(code) => {
            tracing::debug!("Shell on {:?} exited with {}", channel_id, code);
            let _ = handle.exit_status_request(channel_id, code.0).await;
        }
        None => tracing::debug!("Shell on {:?} exited with unknown status", channel_id),
    }

    let _ = handle.eof(channel_id).await;
    let _ = handle.close(channel_id).await;
}

fn spawn_pty_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // EIO once the last slave descriptor closes
                    tracing::trace!("PTY reader stopped: {}", e);
                    break;
                }
            }
        }
    });
}

fn spawn_pty_writer(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<Vec<u8>>) {
    tokio::task::spawn_blocking(move || {
        while let Some(chunk) = rx.blocking_recv() {
            if writer.write_all(&chunk).and_then(|_| writer.flush()).is_err() {
                break;
            }
        }
    });
}
