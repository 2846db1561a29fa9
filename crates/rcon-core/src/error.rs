//! Error taxonomy for single-rcon
//!
//! Errors are grouped by the scope they are allowed to tear down:
//! identity and protocol errors reject a single request or channel,
//! resource errors reject the request that needed the resource, and
//! transport errors end exactly one session.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for single-rcon
#[derive(Error, Debug)]
pub enum RconError {
    /// Peer identity rejected
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Malformed or disallowed request
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Local resource could not be acquired
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Session or connection failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Peer authentication failures.
///
/// The peer only ever observes a generic authentication failure; the
/// variant is for local logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No identity registered under the claimed name
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Presented key differs from the key on record
    #[error("Key mismatch for identity: {0}")]
    KeyMismatch(String),
}

/// Request- or channel-scoped protocol rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Forward-listen asked for a port other than the pinned one
    #[error("Requested port {requested} is not permitted (pinned port is {pinned})")]
    ForbiddenPort { requested: u32, pinned: u16 },

    /// Session already owns a forward binding
    #[error("A forward binding is already active for this session")]
    BindingExists,

    /// Channel type not served by this endpoint
    #[error("Unexpected channel type: {0}")]
    UnexpectedChannel(String),

    /// Second shell request on a session channel
    #[error("Shell already started on this channel")]
    DuplicateShell,

    /// Request type not supported
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),
}

/// Failures acquiring local resources
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Pinned listen address could not be resolved
    #[error("Failed to resolve address {addr}: {source}")]
    AddressResolution {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener bind failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Child process could not be spawned
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// Pseudo-terminal allocation or control failed
    #[error("PTY error: {0}")]
    Pty(String),

    /// Host key could not be created, read or parsed
    #[error("Host key error at {path:?}: {message}")]
    HostKey { path: PathBuf, message: String },
}

/// Session-level failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Authentication was rejected by the peer
    #[error("Authentication rejected")]
    AuthRejected,

    /// Peer host key did not match the pinned key
    #[error("Host key verification failed")]
    HostKeyRejected,

    /// Forward-listen request was refused
    #[error("Forward request rejected: {0}")]
    ForwardRejected(String),

    /// Session closed
    #[error("Session closed")]
    Closed,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Authorized key could not be parsed
    #[error("Invalid key for {name}: {message}")]
    InvalidKey { name: String, message: String },
}
