//! Binary wire protocol ingress
//!
//! Clients speak OP_MSG, plus OP_QUERY for the legacy handshake. Every
//! message is framed by a 16-byte little-endian header.

pub mod protocol;
mod server;
mod types;

pub use server::WireServer;
pub use types::*;
