//! Infrastructure layer for devrelay-server.
//!
//! Everything that touches a socket lives here:
//!
//! - Binding the TCP listener and accepting connections (`ws_server`)
//! - Optional TLS termination (`tls`)
//! - The WebSocket handshake, route-based admission, and running the right
//!   session for the declared role (`relay`)
//! - Converting between tungstenite messages and relay frames, and the
//!   per-connection writer task (`connection`)

pub mod connection;
pub mod relay;
pub mod tls;
pub mod ws_server;

pub use relay::Relay;
pub use ws_server::{run_server, serve};
