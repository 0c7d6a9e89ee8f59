//! Relay: the composition root for one accepted connection.
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──► handshake callback: Route::parse(path)
//!                 ├─ /device       → admit, upgrade, register, send key
//!                 ├─ /remote/{id}  → lookup + bind before upgrade,
//!                 │                  404 (no device) / 503 (fan-out cap)
//!                 └─ anything else → 404
//! Active     ──► session read loop ‖ writer task ‖ shutdown signal
//! Closed     ──► unregister device / unbind client (exactly once)
//! ```
//!
//! Client admission happens *inside* the WebSocket handshake callback, so a
//! client whose key does not resolve never gets an upgraded connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use devrelay_core::{ConnectionIdAllocator, Frame, RelayError, Route};

use super::connection::{inbound_frames, write_outbound};
use crate::application::{ClientSession, DeviceSession, Outbox, SessionRegistry};
use crate::domain::RelayConfig;

/// What the handshake callback decided for a connection.
enum Admission {
    Device,
    Client(ClientSession),
}

/// Shared state for all connections: the registry plus per-connection
/// settings.
pub struct Relay {
    registry: Arc<SessionRegistry>,
    ids: ConnectionIdAllocator,
    write_timeout: Duration,
    outbox_capacity: usize,
}

impl Relay {
    /// Creates a relay with a fresh registry built from `config`.
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_registry(Arc::new(SessionRegistry::from_config(config)), config)
    }

    /// Creates a relay around an existing registry.
    pub fn with_registry(registry: Arc<SessionRegistry>, config: &RelayConfig) -> Self {
        Self {
            registry,
            ids: ConnectionIdAllocator::new(),
            write_timeout: config.write_timeout,
            outbox_capacity: config.outbox_capacity,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Runs one connection from handshake to teardown.
    ///
    /// Returns `Ok(())` for connections that were rejected before upgrade or
    /// ended with an orderly close.
    ///
    /// # Errors
    ///
    /// A failed handshake, a failed device registration, or the I/O error
    /// that ended an established session.
    pub async fn accept<S>(&self, stream: S, peer: SocketAddr) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.ids.next();
        let (outbox, outbound_rx) = Outbox::channel(id, self.outbox_capacity);

        let mut admission = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let decision = self.admit(request.uri().path(), &outbox)?;
            admission = Some(decision);
            Ok(response)
        };

        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(WsError::Http(response)) => {
                info!("{peer}: rejected before upgrade ({})", response.status());
                return Ok(());
            }
            Err(e) => {
                // The callback may already have bound a client.
                if let Some(Admission::Client(session)) = admission {
                    session.close();
                }
                return Err(RelayError::ConnectionRead(format!(
                    "WebSocket handshake with {peer} failed: {e}"
                )));
            }
        };

        match admission {
            Some(Admission::Device) => self.serve_device(ws, outbox, outbound_rx, peer).await,
            Some(Admission::Client(session)) => {
                drop(outbox);
                self.serve_client(ws, session, outbound_rx, peer).await
            }
            None => Ok(()),
        }
    }

    /// Routing decision made inside the handshake callback.
    fn admit(&self, path: &str, outbox: &Outbox) -> Result<Admission, ErrorResponse> {
        match Route::parse(path) {
            Some(Route::Device) => Ok(Admission::Device),
            Some(Route::Client(key)) => {
                if self.registry.lookup_device(&key).is_none() {
                    info!("{}: no device for key {key}", outbox.id());
                    return Err(rejection(StatusCode::NOT_FOUND, "id is missing"));
                }
                ClientSession::bind(
                    Arc::clone(&self.registry),
                    key,
                    outbox.clone(),
                    self.write_timeout,
                )
                .map(Admission::Client)
                .map_err(|e| {
                    info!("{}: join refused: {e}", outbox.id());
                    rejection(status_for(&e), &e.to_string())
                })
            }
            None => {
                debug!("{}: unknown path {path}", outbox.id());
                Err(rejection(StatusCode::NOT_FOUND, "not found"))
            }
        }
    }

    async fn serve_device<S>(
        &self,
        mut ws: WebSocketStream<S>,
        outbox: Outbox,
        outbound_rx: mpsc::Receiver<Frame>,
        peer: SocketAddr,
    ) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session =
            match DeviceSession::register(Arc::clone(&self.registry), outbox, self.write_timeout) {
                Ok(session) => session,
                Err(e) => {
                    warn!("{peer}: device registration failed: {e}");
                    let frame = CloseFrame {
                        code: CloseCode::Error,
                        reason: e.to_string().into(),
                    };
                    if let Err(close_err) = ws.close(Some(frame)).await {
                        debug!("{peer}: close after failed registration: {close_err}");
                    }
                    return Err(e);
                }
            };

        info!("Device connected: {} ({peer})", session.key());

        let (ws_tx, ws_rx) = ws.split();
        let writer = tokio::spawn(write_outbound(
            ws_tx,
            outbound_rx,
            self.write_timeout,
            session.outbox().id(),
        ));

        let result = match session.acknowledge().await {
            Ok(()) => drive(session.run(inbound_frames(ws_rx)), writer, session.outbox()).await,
            Err(e) => Err(e),
        };

        session.close();
        info!("Device disconnected: {} ({peer})", session.key());
        result
    }

    async fn serve_client<S>(
        &self,
        ws: WebSocketStream<S>,
        session: ClientSession,
        outbound_rx: mpsc::Receiver<Frame>,
        peer: SocketAddr,
    ) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        info!("Client connected: {} ({peer})", session.key());

        let (ws_tx, ws_rx) = ws.split();
        let writer = tokio::spawn(write_outbound(
            ws_tx,
            outbound_rx,
            self.write_timeout,
            session.outbox().id(),
        ));

        let result = drive(session.run(inbound_frames(ws_rx)), writer, session.outbox()).await;

        session.close();
        info!("Client disconnected: {} ({peer})", session.key());
        result
    }
}

/// Runs a session's read loop until it ends, the writer stops, or someone
/// asks the connection to shut down.
async fn drive<F>(
    session_loop: F,
    writer: JoinHandle<()>,
    outbox: &Outbox,
) -> Result<(), RelayError>
where
    F: Future<Output = Result<(), RelayError>>,
{
    tokio::select! {
        result = session_loop => result,
        _ = writer => Err(RelayError::ConnectionWrite(format!(
            "{}: writer stopped",
            outbox.id()
        ))),
        _ = outbox.shutdown_requested() => {
            debug!("{}: shutdown requested", outbox.id());
            Ok(())
        }
    }
}

fn status_for(error: &RelayError) -> StatusCode {
    match error {
        RelayError::NoSuchDevice(_) => StatusCode::NOT_FOUND,
        RelayError::ClientLimitReached { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rejection(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use devrelay_core::{ConnectionId, DeviceKey};

    fn relay() -> Relay {
        Relay::new(&RelayConfig::default())
    }

    fn outbox(raw: u64) -> Outbox {
        Outbox::channel(ConnectionId::from_raw(raw), 4).0
    }

    #[test]
    fn test_admit_device_path() {
        let relay = relay();
        assert!(matches!(
            relay.admit("/device", &outbox(1)),
            Ok(Admission::Device)
        ));
    }

    #[test]
    fn test_admit_unknown_path_is_not_found() {
        let relay = relay();
        let Err(response) = relay.admit("/nowhere", &outbox(1)) else {
            panic!("unknown path must be rejected");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_admit_client_without_device_is_not_found() {
        let relay = relay();
        let Err(response) = relay.admit("/remote/abcdef", &outbox(1)) else {
            panic!("unknown key must be rejected");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(relay.registry().device_count(), 0);
    }

    #[test]
    fn test_admit_client_binds_before_upgrade() {
        // Arrange
        let relay = relay();
        let key = relay.registry().register_device(outbox(1)).unwrap();

        // Act
        let admission = relay.admit(&format!("/remote/{key}"), &outbox(2));

        // Assert
        assert!(matches!(admission, Ok(Admission::Client(_))));
        assert_eq!(relay.registry().client_count(&key), 1);
    }

    #[test]
    fn test_admit_client_over_cap_is_service_unavailable() {
        let config = RelayConfig {
            max_clients_per_device: Some(1),
            ..RelayConfig::default()
        };
        let relay = Relay::new(&config);
        let key = relay.registry().register_device(outbox(1)).unwrap();
        let _first = relay.admit(&format!("/remote/{key}"), &outbox(2));

        let Err(response) = relay.admit(&format!("/remote/{key}"), &outbox(3)) else {
            panic!("second client must be refused");
        };

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&RelayError::NoSuchDevice(DeviceKey::from("x"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&RelayError::KeySpaceExhausted { attempts: 1 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
