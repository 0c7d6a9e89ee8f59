//! Error taxonomy shared across the relay.
//!
//! Every variant describes a failure that is *local* to one connection
//! attempt or one established connection.  None of them is fatal to the
//! process: the transport layer logs the error, cleans up the one affected
//! session, and keeps serving everybody else.

use thiserror::Error;

use crate::domain::key::DeviceKey;

/// Errors produced by key generation, the session registry, and the
/// per-connection read/write paths.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The OS random source could not produce bytes for a new device key.
    ///
    /// The device connection attempt is closed and no key is issued.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// No free device key was found after the bounded number of attempts.
    #[error("no free device key after {attempts} attempt(s)")]
    KeySpaceExhausted { attempts: usize },

    /// A client asked to join a key that has no live device session.
    #[error("no device session for key {0}")]
    NoSuchDevice(DeviceKey),

    /// The device already has the configured maximum number of clients bound.
    #[error("device {key} already has {limit} client(s) bound")]
    ClientLimitReached { key: DeviceKey, limit: usize },

    /// Reading the next frame from a connection failed.
    #[error("connection read error: {0}")]
    ConnectionRead(String),

    /// Writing a frame to a connection failed or timed out.
    #[error("connection write error: {0}")]
    ConnectionWrite(String),

    /// A relay-generated payload could not be serialised.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Returns `true` for errors that reject a connection *before* any frame
    /// is exchanged (as opposed to errors on an established session).
    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            Self::EntropyUnavailable(_)
                | Self::KeySpaceExhausted { .. }
                | Self::NoSuchDevice(_)
                | Self::ClientLimitReached { .. }
        )
    }
}
