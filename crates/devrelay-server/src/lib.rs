//! devrelay-server library crate.
//!
//! A rendezvous relay: a device connects on `/device` and receives a short
//! random key; any number of clients join that device on `/remote/{key}`.
//! Frames from the device are fanned out to every bound client, frames from a
//! client go to the device.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Device (WebSocket)          Clients (WebSocket)
//!         ↕                          ↕
//! [devrelay-server]
//!   ├── domain/           RelayConfig, TlsSettings, connection Lifecycle
//!   ├── application/      SessionRegistry, DeviceSession, ClientSession, Outbox
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and optional TLS (tokio-rustls)
//!         ├── relay/      Handshake routing and per-connection wiring
//!         └── connection/ WebSocket ↔ Frame adapters (tokio-tungstenite)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain`, `devrelay-core` and Tokio channels only;
//!   it never sees a socket.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and `tokio-rustls`.

/// Domain layer: configuration and connection state (no I/O).
pub mod domain;

/// Application layer: registry and session logic.
pub mod application;

/// Infrastructure layer: listener, TLS, and WebSocket adapters.
pub mod infrastructure;
