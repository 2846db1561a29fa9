//! Identity handling shared by the broker and the agent
//!
//! - [`host_key`]: the persisted signing key each session-terminating role
//!   presents to its peers.
//! - [`authorized_key`]: parsing of single-line authorized/known-host keys.
//! - [`policy`]: the static name → key tables consulted during public key
//!   authentication.

pub mod authorized_key;
pub mod host_key;
pub mod policy;

pub use authorized_key::{AuthorizedKey, KeyParseError};
pub use host_key::{decode_private_key, load_or_create};
pub use policy::{AgentIdentity, EndUserIdentity, Identity, IdentityTable};
