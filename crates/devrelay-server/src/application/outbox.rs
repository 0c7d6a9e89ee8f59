//! Outbound frame queue of one connection.
//!
//! Every connection owns a bounded mpsc queue drained by a dedicated writer
//! task (see `infrastructure::connection`).  An [`Outbox`] is the sending
//! end: cheap to clone, stored in the registry, and used by *other* sessions
//! to deliver frames to this connection.
//!
//! Queueing a frame is bounded by a write timeout, so a peer that stops
//! reading can delay its sender for at most that long.  A single queue per
//! destination keeps frames from one source in the order they were read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Notify;

use devrelay_core::{ConnectionId, Frame, RelayError};

/// Sending end of a connection's outbound queue plus its shutdown signal.
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    shutdown: Arc<Notify>,
}

impl Outbox {
    /// Creates the queue for connection `id`.  A capacity of 0 is raised to 1.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            id,
            tx,
            shutdown: Arc::new(Notify::new()),
        };
        (outbox, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `frame` for this connection, waiting at most `write_timeout`
    /// for room in the queue.
    ///
    /// # Errors
    ///
    /// [`RelayError::ConnectionWrite`] if the connection's writer is gone or
    /// the queue stayed full for the whole timeout.
    pub async fn deliver(&self, frame: Frame, write_timeout: Duration) -> Result<(), RelayError> {
        self.tx
            .send_timeout(frame, write_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => RelayError::ConnectionWrite(format!(
                    "{}: outbound queue full for {write_timeout:?}",
                    self.id
                )),
                SendTimeoutError::Closed(_) => {
                    RelayError::ConnectionWrite(format!("{}: connection closed", self.id))
                }
            })
    }

    /// Asks the owning connection to close.  Safe to call more than once and
    /// before anyone is waiting.
    pub fn shut_down(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`shut_down`](Self::shut_down) has been called.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}
