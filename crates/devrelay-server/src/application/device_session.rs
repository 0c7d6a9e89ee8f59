//! DeviceSession: lifecycle and read loop of one device connection.
//!
//! # Per-frame flow
//!
//! ```text
//! inbound frame
//!   └─ classify_device_frame()
//!        ├─ Payload(frame)              → fan_out(frame)
//!        └─ Control { GetDeviceKey, r } → reply {"deviceKey": key} to device
//!                                         then fan_out(r) if r is Some
//! ```
//!
//! Fan-out re-reads the bound set from the registry for every frame.  A write
//! failure on one client unbinds and closes only that client; the device and
//! the other clients carry on.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use devrelay_core::{
    classify_device_frame, ConnectPayload, ControlCommand, DeviceFrame, DeviceKey, Frame,
    RelayError,
};

use super::outbox::Outbox;
use super::registry::SessionRegistry;
use crate::domain::{ConnectionState, Lifecycle};

/// One registered device.
pub struct DeviceSession {
    key: DeviceKey,
    outbox: Outbox,
    registry: Arc<SessionRegistry>,
    write_timeout: Duration,
    lifecycle: Lifecycle,
}

impl DeviceSession {
    /// Registers the device connection behind `outbox` and returns its
    /// session, already `Active`.
    ///
    /// # Errors
    ///
    /// Key generation failures from [`SessionRegistry::register_device`].
    pub fn register(
        registry: Arc<SessionRegistry>,
        outbox: Outbox,
        write_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let key = registry.register_device(outbox.clone())?;
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

    /// Sends `{"deviceKey": key}` to the device.
    ///
    /// Used both right after registration and in answer to `getDeviceKey`.
    ///
    /// # Errors
    ///
    /// [`RelayError::ConnectionWrite`] if the device's queue is closed or full.
    pub async fn acknowledge(&self) -> Result<(), RelayError> {
        let frame = ConnectPayload::new(self.key.clone()).to_frame()?;
        self.outbox.deliver(frame, self.write_timeout).await
    }

    /// Reads frames until the stream ends or yields an error.
    ///
    /// Does *not* unregister the device; call [`close`](Self::close) after
    /// the loop, whichever way it ended.
    ///
    /// # Errors
    ///
    /// The read error that ended the stream, or a write error on the
    /// device's own connection while answering a control command.
    pub async fn run<S>(&self, mut inbound: S) -> Result<(), RelayError>
    where
        S: Stream<Item = Result<Frame, RelayError>> + Unpin,
    {
        while let Some(item) = inbound.next().await {
            self.handle_frame(item?).await?;
        }
        debug!("device {}: inbound stream ended", self.key);
        Ok(())
    }

    /// Processes one inbound frame from the device.
    ///
    /// # Errors
    ///
    /// Only failures to answer the device itself; client-side failures are
    /// handled inside the fan-out.
    pub async fn handle_frame(&self, frame: Frame) -> Result<(), RelayError> {
        debug!(
            "> {} [{}, {} bytes] {}",
            self.key,
            frame.kind(),
            frame.len(),
            frame.preview()
        );

        match classify_device_frame(frame) {
            DeviceFrame::Payload(frame) => {
                self.fan_out(frame).await;
            }
            DeviceFrame::Control { command, remainder } => {
                match command {
                    ControlCommand::GetDeviceKey => {
                        info!("device {}: processing getDeviceKey request", self.key);
                        self.acknowledge().await?;
                    }
                }
                if let Some(rest) = remainder {
                    self.fan_out(rest).await;
                }
            }
        }
        Ok(())
    }

    /// Delivers `frame` to every currently bound client.  Returns the number
    /// of clients that accepted it.
    ///
    /// All deliveries run concurrently, so the whole fan-out takes at most
    /// one write timeout however many clients are stalled.
    pub async fn fan_out(&self, frame: Frame) -> usize {
        let clients = self.registry.clients_of(&self.key);
        if clients.is_empty() {
            return 0;
        }

        let deliveries = clients
            .iter()
            .map(|client| client.deliver(frame.clone(), self.write_timeout));
        let results = join_all(deliveries).await;

        let mut delivered = 0;
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("device {}: dropping client {}: {e}", self.key, client.id());
                    self.registry.unbind_client(&self.key, client.id());
                    client.shut_down();
                }
            }
        }
        delivered
    }

    /// Unregisters the device.  Runs once; later calls return `false`.
    pub fn close(&self) -> bool {
        if !self.lifecycle.close() {
            return false;
        }
        self.registry.unregister_device(&self.key, self.outbox.id());
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::sync::mpsc;

    use devrelay_core::ConnectionId;

    const TIMEOUT: Duration = Duration::from_millis(50);

    struct Harness {
        registry: Arc<SessionRegistry>,
        session: DeviceSession,
        device_rx: mpsc::Receiver<Frame>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SessionRegistry::default());
        let (outbox, device_rx) = Outbox::channel(ConnectionId::from_raw(1), 16);
        let session = DeviceSession::register(Arc::clone(&registry), outbox, TIMEOUT).unwrap();
        Harness {
            registry,
            session,
            device_rx,
        }
    }

    fn bind(h: &Harness, raw: u64, capacity: usize) -> (Outbox, mpsc::Receiver<Frame>) {
        let (outbox, rx) = Outbox::channel(ConnectionId::from_raw(raw), capacity);
        h.registry.bind_client(h.session.key(), outbox.clone()).unwrap();
        (outbox, rx)
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_acknowledge_sends_key() {
        // Arrange
        let mut h = harness();

        // Act
        h.session.acknowledge().await.unwrap();

        // Assert
        let expected = format!(r#"{{"deviceKey":"{}"}}"#, h.session.key());
        assert_eq!(h.device_rx.recv().await, Some(Frame::Text(expected)));
    }

    #[tokio::test]
    async fn test_payload_reaches_every_client_in_order() {
        let h = harness();
        let (_a, mut a_rx) = bind(&h, 2, 8);
        let (_b, mut b_rx) = bind(&h, 3, 8);

        let frames = vec![Ok(text(r#"{"temp": 21}"#)), Ok(Frame::Binary(vec![0, 159, 146]))];
        h.session.run(stream::iter(frames)).await.unwrap();

        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(rx.recv().await, Some(text(r#"{"temp": 21}"#)));
            assert_eq!(rx.recv().await, Some(Frame::Binary(vec![0, 159, 146])));
            assert!(rx.try_recv().is_err(), "each frame exactly once");
        }
    }

    #[tokio::test]
    async fn test_get_device_key_is_answered_and_not_forwarded() {
        // Arrange
        let mut h = harness();
        let (_client, mut client_rx) = bind(&h, 2, 8);

        // Act
        h.session
            .handle_frame(text(r#"{"getDeviceKey": true}"#))
            .await
            .unwrap();

        // Assert
        let reply = h.device_rx.recv().await.expect("device gets a reply");
        let Frame::Text(reply) = reply else {
            panic!("reply must be text");
        };
        let payload: ConnectPayload = serde_json::from_str(&reply).unwrap();
        assert_eq!(&payload.device_key, h.session.key());
        assert!(client_rx.try_recv().is_err(), "control frame must not leak");
    }

    #[tokio::test]
    async fn test_control_remainder_is_forwarded() {
        let h = harness();
        let (_client, mut client_rx) = bind(&h, 2, 8);

        h.session
            .handle_frame(text(r#"{"getDeviceKey": true, "temp": 21}"#))
            .await
            .unwrap();

        let Some(Frame::Text(rest)) = client_rx.recv().await else {
            panic!("remainder must be forwarded as text");
        };
        let value: serde_json::Value = serde_json::from_str(&rest).unwrap();
        assert_eq!(value, serde_json::json!({"temp": 21}));
    }

    #[tokio::test]
    async fn test_stalled_client_is_dropped_without_affecting_others() {
        // Arrange: client 2 never drains its single-slot queue.
        let h = harness();
        let (stalled, _stalled_rx) = bind(&h, 2, 1);
        let (_healthy, mut healthy_rx) = bind(&h, 3, 8);

        // Act
        let first = h.session.fan_out(text("one")).await;
        let second = h.session.fan_out(text("two")).await;

        // Assert
        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert_eq!(h.registry.client_count(h.session.key()), 1);
        assert_eq!(healthy_rx.recv().await, Some(text("one")));
        assert_eq!(healthy_rx.recv().await, Some(text("two")));
        tokio::time::timeout(TIMEOUT, stalled.shutdown_requested())
            .await
            .expect("evicted client must be told to close");
    }

    #[tokio::test]
    async fn test_client_with_closed_connection_is_unbound() {
        let h = harness();
        let (_gone, gone_rx) = bind(&h, 2, 4);
        drop(gone_rx);

        let delivered = h.session.fan_out(text("x")).await;

        assert_eq!(delivered, 0);
        assert_eq!(h.registry.client_count(h.session.key()), 0);
    }

    #[tokio::test]
    async fn test_read_error_ends_loop_with_error() {
        let h = harness();
        let frames = vec![
            Ok(text("a")),
            Err(RelayError::ConnectionRead("reset".into())),
            Ok(text("never")),
        ];

        let result = h.session.run(stream::iter(frames)).await;

        assert!(matches!(result, Err(RelayError::ConnectionRead(_))));
    }

    #[tokio::test]
    async fn test_close_unregisters_exactly_once() {
        let h = harness();
        let key = h.session.key().clone();

        assert!(h.session.close());
        assert!(!h.session.close());
        assert!(h.registry.lookup_device(&key).is_none());
        assert_eq!(h.session.state(), ConnectionState::Closed);
    }
}
