//! Endpoint routing.
//!
//! The relay exposes two WebSocket endpoints:
//!
//! | Path            | Role   |
//! |-----------------|--------|
//! | `/device`       | Device |
//! | `/remote/{id}`  | Client joining device key `id` |
//!
//! Every other path is rejected with a not-found response before any upgrade.

use crate::domain::key::DeviceKey;

/// Path of the device endpoint.
pub const DEVICE_PATH: &str = "/device";

/// Prefix of the client endpoint; the device key follows it.
pub const CLIENT_PATH_PREFIX: &str = "/remote/";

/// The role a connection declares through its request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/device`: publish a new session.
    Device,
    /// `/remote/{id}`: join the device published under `id`.
    Client(DeviceKey),
}

impl Route {
    /// Parses a request path (query string already stripped or not).
    ///
    /// Returns `None` for unknown paths and for `/remote/` with an empty or
    /// multi-segment id.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or_default();

        if path == DEVICE_PATH {
            return Some(Self::Device);
        }

        let id = path.strip_prefix(CLIENT_PATH_PREFIX)?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(Self::Client(DeviceKey::from(id)))
    }
}
