//! # devrelay-core
//!
//! Shared library for devrelay containing the device key type and its
//! generator, the transport-neutral frame type, the control-command parser,
//! and the error taxonomy used by every layer of the relay.
//!
//! It has zero dependencies on network sockets or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! devrelay is a rendezvous relay: one *device* connects and is handed a short
//! random key; any number of *clients* then join that device by presenting the
//! key.  From then on every frame the device sends is copied to all of its
//! clients, and every frame a client sends is passed to the device.
//!
//! This crate (`devrelay-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Identity types: the [`DeviceKey`] a device is published
//!   under, the [`KeyGenerator`] that draws it from OS entropy, and the
//!   [`ConnectionId`] that tells two connections apart inside the registry.
//!
//! - **`protocol`** – What travels over a connection: a [`Frame`] (text or
//!   binary, type preserved), the reserved `getDeviceKey` control command, the
//!   `{"deviceKey": ...}` acknowledgment, and the endpoint [`Route`]s.
//!
//! - **`error`** – [`RelayError`], the failure taxonomy shared by the registry,
//!   the sessions, and the transport glue.

pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `devrelay_core::DeviceKey` instead of `devrelay_core::domain::key::DeviceKey`.
pub use domain::connection_id::{ConnectionId, ConnectionIdAllocator};
pub use domain::key::{generate_free_key, DeviceKey, KeyGenerator, OsKeyGenerator, DEFAULT_KEY_BYTES};
pub use error::RelayError;
pub use protocol::control::{classify_device_frame, ConnectPayload, ControlCommand, DeviceFrame};
pub use protocol::frame::Frame;
pub use protocol::route::Route;
