//! rcon-agent: Remote end of a single-rcon tunnel
//!
//! The agent dials the broker, authenticates, and asks for its one pinned
//! forward. Every forwarded channel the broker opens carries a complete,
//! nested SSH session which the agent terminates itself and answers with
//! an interactive shell, with or without a pseudo-terminal.

pub mod agent;
pub mod install;
pub mod pty;
pub mod shell;
pub mod state;
pub mod tunnel;

pub use agent::Agent;
pub use state::AgentState;
