//! Domain layer for devrelay-server.
//!
//! Plain data with no I/O: the runtime configuration and the per-connection
//! lifecycle state machine.

pub mod config;
pub mod lifecycle;

pub use config::{RelayConfig, TlsSettings};
pub use lifecycle::{ConnectionState, Lifecycle};
