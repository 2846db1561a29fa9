//! rcon-core: Shared building blocks for single-rcon
//!
//! This crate provides the configuration structures, error taxonomy and
//! identity handling (host keys and peer authentication) used by both the
//! broker and the agent, plus the SSH server settings and signal handling
//! their binaries share.

pub mod config;
pub mod error;
pub mod identity;
pub mod limit;
pub mod runtime;
pub mod types;

pub use error::RconError;
pub use limit::ConcurrencyLimit;
pub use types::{ExitCode, PtyDimensions};
