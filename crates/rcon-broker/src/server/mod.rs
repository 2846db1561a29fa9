//! SSH server for agent tunnels

mod handler;
mod listener;

pub use handler::{BrokerHandler, SessionPhase};
pub use listener::BrokerServer;
