//! Per-connection plumbing between tungstenite and the application layer.
//!
//! ```text
//! socket ─► ws_rx ─► inbound_frames() ─► Stream<Frame> ─► session.run()
//! socket ◄─ ws_tx ◄─ write_outbound() ◄─ mpsc<Frame>   ◄─ Outbox::deliver()
//! ```
//!
//! WebSocket control messages never reach a session: pings are answered by
//! tungstenite itself, pongs and raw frames are skipped, and a Close message
//! ends the inbound stream.

use std::time::Duration;

use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

use devrelay_core::{ConnectionId, Frame, RelayError};

/// Converts a relay frame into the WebSocket message of the same type.
pub fn to_ws_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(bytes) => WsMessage::Binary(bytes),
    }
}

/// Adapts the read half of a WebSocket into the relay's inbound frame stream.
///
/// The stream ends at a Close message or when the peer is already gone; any
/// other transport error is yielded once as [`RelayError::ConnectionRead`].
pub fn inbound_frames<S>(ws_rx: S) -> impl Stream<Item = Result<Frame, RelayError>> + Unpin
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    ws_rx
        .take_while(|item| future::ready(!is_end_of_stream(item)))
        .filter_map(|item| {
            future::ready(match item {
                Ok(WsMessage::Text(text)) => Some(Ok(Frame::from(text))),
                Ok(WsMessage::Binary(bytes)) => Some(Ok(Frame::from(bytes))),
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
                Ok(WsMessage::Close(_)) => None,
                Err(e) => Some(Err(RelayError::ConnectionRead(e.to_string()))),
            })
        })
}

fn is_end_of_stream(item: &Result<WsMessage, WsError>) -> bool {
    matches!(
        item,
        Ok(WsMessage::Close(_)) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed)
    )
}

/// Drains a connection's outbound queue onto its WebSocket write half.
///
/// Each write is bounded by `write_timeout`.  Returns on the first failed or
/// timed-out write, or, once every [`Outbox`](crate::application::Outbox)
/// for this connection has been dropped, after sending a Close message.
pub async fn write_outbound<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Frame>,
    write_timeout: Duration,
    conn: ConnectionId,
) where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match timeout(write_timeout, sink.send(to_ws_message(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("{conn}: write failed: {e}");
                return;
            }
            Err(_) => {
                warn!("{conn}: write timed out after {write_timeout:?}");
                return;
            }
        }
    }

    // Errors here mean the peer is already gone.
    let _ = timeout(write_timeout, sink.close()).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
