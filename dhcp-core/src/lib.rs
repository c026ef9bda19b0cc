//! A DHCPv4 server engine: decodes/encodes the wire format (RFC 2131,
//! RFC 2132, RFC 3046, RFC 3396), evaluates ISC-dhcpd-style scoped option
//! statements, tracks lease state, and runs the per-message request
//! pipeline (`DISCOVER`/`REQUEST`/`DECLINE`/`RELEASE`/`INFORM` plus plain
//! BOOTP) against a pluggable [`collab::LeaseStore`] and [`collab::Transport`].
//!
//! Everything above the wire codec is synchronous and allocation-based;
//! callers own the event loop (see the `dhcpd` binary) and hand each
//! received datagram to [`engine::Engine::handle_datagram`].

pub mod collab;
pub mod config;
pub mod db;
pub mod engine;
pub mod index;
pub mod model;
pub mod reply;
pub mod scope;
pub mod store;
pub mod wire;

pub use collab::{DbError, LeaseStore, NoopPingProbe, PingProbe, Transport};
pub use config::{Config, ConfigError};
pub use db::{FileLeaseStore, InMemoryLeaseStore};
pub use engine::Engine;
pub use model::{HardwareAddr, Lease, MessageType, Request};
