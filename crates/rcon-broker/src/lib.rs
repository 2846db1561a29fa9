//! rcon-broker: Public endpoint for single-rcon agents
//!
//! The broker accepts outbound tunnels from registered agents, authenticates
//! them against a static key table, and binds one pinned TCP listener per
//! agent. Every TCP connection accepted on that listener is relayed, byte
//! for byte, over a forwarded channel back into the agent's tunnel.

pub mod forward;
pub mod server;
pub mod state;

pub use server::BrokerServer;
pub use state::BrokerState;
