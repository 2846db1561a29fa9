//! Nested session handler
//!
//! Serves exactly one `session` channel per nested session. Terminal
//! parameters may arrive before or after the shell starts; the shell may
//! start only once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio_util::sync::CancellationToken;

use rcon_core::error::{ProtocolViolation, RconError};
use rcon_core::identity::{EndUserIdentity, IdentityTable};
use rcon_core::PtyDimensions;

use super::process::{PtyRequest, ShellProcess};
use crate::pty::PtyControl;

/// Where a session channel is in its life
pub enum ShellPhase {
    /// Channel open, shell not started
    Negotiating(Channel<Msg>),
    /// Shell running; holds the resize control when on a pty
    Running(Option<PtyControl>),
    /// Channel closed by the peer
    Closed,
}

impl fmt::Debug for ShellPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negotiating(_) => f.write_str("Negotiating"),
            Self::Running(Some(_)) => f.write_str("Running(pty)"),
            Self::Running(None) => f.write_str("Running"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// Per-channel terminal negotiation state
#[derive(Debug)]
pub struct ShellSessionState {
    channel_id: ChannelId,
    /// Set by `pty-req`; absent means the shell runs without a pty
    pty: Option<PtyRequest>,
    phase: ShellPhase,
}

impl ShellSessionState {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel_id: channel.id(),
            pty: None,
            phase: ShellPhase::Negotiating(channel),
        }
    }

    pub fn phase(&self) -> &ShellPhase {
        &self.phase
    }

    fn record_pty(&mut self, term: &str, dims: PtyDimensions) {
        self.pty = Some(PtyRequest {
            term: term.to_string(),
            dims,
        });
    }

    fn resize(&mut self, dims: PtyDimensions) {
        if let Some(pty) = self.pty.as_mut() {
            pty.dims = dims;
        }

        if let ShellPhase::Running(Some(control)) = &self.phase {
            if let Err(e) = control.resize(dims) {
                tracing::warn!("{}", e);
            }
        }
    }

    /// Start the shell if it has not been started yet
    fn start(
        &mut self,
        program: &str,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<(), RconError> {
        let channel = match std::mem::replace(&mut self.phase, ShellPhase::Closed) {
            ShellPhase::Negotiating(channel) => channel,
            other => {
                self.phase = other;
                return Err(ProtocolViolation::DuplicateShell.into());
            }
        };

        let process = match ShellProcess::spawn(program, self.pty.as_ref()) {
            Ok(process) => process,
            Err(e) => {
                self.phase = ShellPhase::Negotiating(channel);
                return Err(e.into());
            }
        };

        let control = process.attach(channel, session.handle(), cancel);
        self.phase = ShellPhase::Running(control);
        Ok(())
    }
}

/// Handler for one nested session
pub struct ShellHandler {
    /// End users allowed in
    users: Arc<IdentityTable<EndUserIdentity>>,
    /// Program started for `shell`
    program: String,
    /// Originator reported by the broker, for logs
    origin: String,
    /// Set after authentication
    user: Option<String>,
    /// The session's single channel
    state: Option<ShellSessionState>,
    /// Cancelled when the nested session ends
    cancel: CancellationToken,
}

impl ShellHandler {
    pub fn new(
        users: Arc<IdentityTable<EndUserIdentity>>,
        program: String,
        origin: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            users,
            program,
            origin,
            user: None,
            state: None,
            cancel,
        }
    }

    fn label(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.origin),
            None => self.origin.clone(),
        }
    }

    /// State for `channel`, if it is this session's channel
    fn channel_state(&mut self, channel: ChannelId) -> Option<&mut ShellSessionState> {
        self.state.as_mut().filter(|s| s.channel_id == channel)
    }

    fn refuse(&self, channel: ChannelId, violation: ProtocolViolation, session: &mut Session) {
        tracing::warn!("Nested session {}: {} on {:?}", self.label(), violation, channel);
        session.channel_failure(channel);
    }
}

impl Drop for ShellHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::debug!("Nested session {} closed", self.label());
    }
}

#[async_trait]
impl Handler for ShellHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.users.authenticate(user, &public_key.public_key_bytes()) {
            Ok(identity) => {
                tracing::info!(
                    "User {} authenticated via {} ({})",
                    identity.name,
                    self.origin,
                    public_key.fingerprint()
                );
                self.user = Some(identity.name.clone());
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!("Nested authentication via {} rejected: {}", self.origin, e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.state.is_some() {
            tracing::warn!(
                "Nested session {}: {}",
                self.label(),
                ProtocolViolation::UnexpectedChannel("second session".into())
            );
            return Ok(false);
        }

        tracing::debug!("Nested session {}: channel {:?} open", self.label(), channel.id());
        self.state = Some(ShellSessionState::new(channel));
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::warn!(
            "Nested session {}: {} to {}:{}",
            self.label(),
            ProtocolViolation::UnexpectedChannel("direct-tcpip".into()),
            host_to_connect,
            port_to_connect
        );
        Ok(false)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let dims = PtyDimensions::new(col_width, row_height, pix_width, pix_height);
        let Some(state) = self.channel_state(channel) else {
            self.refuse(channel, ProtocolViolation::UnsupportedRequest("pty-req".into()), session);
            return Ok(());
        };

        state.record_pty(term, dims);
        tracing::debug!("PTY requested on {:?}: {} {}", channel, term, dims);
        session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let dims = PtyDimensions::new(col_width, row_height, pix_width, pix_height);
        if let Some(state) = self.channel_state(channel) {
            tracing::trace!("Window change on {:?}: {}", channel, dims);
            state.resize(dims);
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let program = self.program.clone();
        let cancel = self.cancel.child_token();
        let label = self.label();

        let Some(state) = self.channel_state(channel) else {
            self.refuse(channel, ProtocolViolation::UnsupportedRequest("shell".into()), session);
            return Ok(());
        };

        match state.start(&program, session, cancel) {
            Ok(()) => {
                tracing::info!("Nested session {}: shell started ({:?})", label, state.phase());
                session.channel_success(channel);
            }
            Err(e) => {
                tracing::warn!("Nested session {}: shell refused: {}", label, e);
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        self.refuse(
            channel,
            ProtocolViolation::UnsupportedRequest(format!("exec {:?}", command)),
            session,
        );
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse(
            channel,
            ProtocolViolation::UnsupportedRequest(format!("subsystem {}", name)),
            session,
        );
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::warn!(
            "Nested session {}: {}",
            self.label(),
            ProtocolViolation::UnsupportedRequest(format!("tcpip-forward {}:{}", address, port))
        );
        Ok(false)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channel_state(channel) {
            state.phase = ShellPhase::Closed;
        }
        Ok(())
    }
}
