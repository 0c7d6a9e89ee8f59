//! ClientSession: lifecycle and read loop of one client connection.
//!
//! Every inbound client frame goes to the bound device unchanged; there is no
//! command interception on this side.  Once the device has gone (or the
//! client was detached from it) forwards are silently dropped, and the loop
//! keeps running until the client's own connection ends.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use devrelay_core::{DeviceKey, Frame, RelayError};

use super::outbox::Outbox;
use super::registry::SessionRegistry;
use crate::domain::{ConnectionState, Lifecycle};

/// One client bound to a device key.
///
/// The client does not own the device session; it resolves the device through
/// the registry on every forward.
pub struct ClientSession {
    key: DeviceKey,
    outbox: Outbox,
    registry: Arc<SessionRegistry>,
    write_timeout: Duration,
    lifecycle: Lifecycle,
}

impl ClientSession {
    /// Binds the client connection behind `outbox` to the device published
    /// under `key`.
    ///
    /// # Errors
    ///
    /// [`RelayError::NoSuchDevice`] or [`RelayError::ClientLimitReached`];
    /// the caller must reject the connection.
    pub fn bind(
        registry: Arc<SessionRegistry>,
        key: DeviceKey,
        outbox: Outbox,
        write_timeout: Duration,
    ) -> Result<Self, RelayError> {
        registry.bind_client(&key, outbox.clone())?;
        let lifecycle = Lifecycle::new();
        lifecycle.activate();
        Ok(Self {
            key,
            outbox,
            registry,
            write_timeout,
            lifecycle,
        })
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Reads frames until the stream ends or yields an error.
    ///
    /// Does *not* unbind; call [`close`](Self::close) afterwards.
    ///
    /// # Errors
    ///
    /// The read error that ended the stream.
    pub async fn run<S>(&self, mut inbound: S) -> Result<(), RelayError>
    where
        S: Stream<Item = Result<Frame, RelayError>> + Unpin,
    {
        while let Some(item) = inbound.next().await {
            self.forward(item?).await;
        }
        debug!("client {}: inbound stream ended", self.outbox.id());
        Ok(())
    }

    /// Passes one frame to the device.  Returns `true` if it was queued.
    pub async fn forward(&self, frame: Frame) -> bool {
        debug!(
            "< {} [{}, {} bytes] {}",
            self.key,
            frame.kind(),
            frame.len(),
            frame.preview()
        );

        let Some(device) = self.registry.device_for_client(&self.key, self.outbox.id()) else {
            debug!(
                "client {}: device {} is gone; frame dropped",
                self.outbox.id(),
                self.key
            );
            return false;
        };

        match device.deliver(frame, self.write_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!("client {}: forward to device {} failed: {e}", self.outbox.id(), self.key);
                false
            }
        }
    }

    /// Unbinds the client.  Runs once; later calls return `false`.
    pub fn close(&self) -> bool {
        if !self.lifecycle.close() {
            return false;
        }
        self.registry.unbind_client(&self.key, self.outbox.id());
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
