//! Pseudo-terminal processes
//!
//! Wraps portable-pty: open a pty pair sized from the negotiated
//! dimensions, start the shell on the slave side, and hand back the master
//! side split into a blocking reader, a blocking writer and a resize
//! control.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};

use rcon_core::error::ResourceError;
use rcon_core::{ExitCode, PtyDimensions};

/// Convert negotiated dimensions to a portable-pty size
pub fn pty_size(dims: PtyDimensions) -> PtySize {
    let (cols, rows, pixel_width, pixel_height) = dims.as_u16();
    PtySize {
        rows,
        cols,
        pixel_width,
        pixel_height,
    }
}

/// Resize handle for a running pty
pub struct PtyControl {
    master: Box<dyn MasterPty + Send>,
}

impl PtyControl {
    pub fn resize(&self, dims: PtyDimensions) -> Result<(), ResourceError> {
        self.master
            .resize(pty_size(dims))
            .map_err(|e| ResourceError::Pty(format!("resize to {} failed: {}", dims, e)))
    }
}

/// A shell running on a fresh pseudo-terminal
pub struct PtyProcess {
    pub control: PtyControl,
    pub child: Box<dyn Child + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl PtyProcess {
    /// Start `program` on a new pty.
    ///
    /// `term` is exported as `TERM` when non-empty; the rest of the
    /// environment is inherited.
    pub fn spawn(program: &str, term: &str, dims: PtyDimensions) -> Result<Self, ResourceError> {
        let pair = native_pty_system()
            .openpty(pty_size(dims))
            .map_err(|e| ResourceError::Pty(format!("failed to open pty: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        if !term.is_empty() {
            cmd.env("TERM", term);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ResourceError::Spawn(format!("{}: {}", program, e)))?;
        // The child holds its own slave descriptors; ours must go so the
        // reader sees EOF when the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ResourceError::Pty(format!("failed to clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ResourceError::Pty(format!("failed to take writer: {}", e)))?;

        tracing::debug!(
            "Spawned {} on pty {} (pid {:?})",
            program,
            dims,
            child.process_id()
        );

        Ok(Self {
            control: PtyControl {
                master: pair.master,
            },
            child,
            reader,
            writer,
        })
    }
}

/// Block until `child` exits and map its status
pub fn wait_exit(mut child: Box<dyn Child + Send + Sync>) -> Option<ExitCode> {
    match child.wait() {
        Ok(status) => exit_code(&status),
        Err(e) => {
            tracing::debug!("Failed to wait for pty child: {}", e);
            None
        }
    }
}

/// Exit code of a finished pty child.
///
/// portable-pty reports code 1 for a child killed by a signal and only
/// names the signal in its `Display` form; such a status has no code.
pub fn exit_code(status: &ExitStatus) -> Option<ExitCode> {
    if status.success() {
        return Some(ExitCode(0));
    }
    if status.to_string().starts_with("Terminated by") {
        return None;
    }
    Some(ExitCode(status.exit_code()))
}
