//! Application layer for devrelay-server.
//!
//! Knows *what* the relay does (who is registered, who is bound to whom,
//! where each frame goes) without knowing *how* bytes reach a socket.
//! Sessions consume a `Stream` of inbound [`Frame`](devrelay_core::Frame)s and
//! write into per-connection [`Outbox`] queues; the infrastructure layer
//! connects both ends to real WebSocket connections.

pub mod client_session;
pub mod device_session;
pub mod outbox;
pub mod registry;

pub use client_session::ClientSession;
pub use device_session::DeviceSession;
pub use outbox::Outbox;
pub use registry::SessionRegistry;
