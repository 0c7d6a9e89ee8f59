//! Relay listener: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Optionally wrapping each accepted stream in TLS.
//! 3. Handing the stream to [`Relay::accept`] on its own Tokio task, which
//!    performs the WebSocket handshake and runs the device or client session.
//! 4. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Scalability
//!
//! The accept loop never awaits a connection's handshake or traffic: it
//! spawns a task and goes straight back to `accept()`, so one slow peer never
//! delays others.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use super::relay::Relay;
use super::tls::load_tls_acceptor;
use crate::domain::RelayConfig;

/// How often the accept loop wakes up to check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the TLS certificate
/// and key cannot be loaded.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let tls = match &config.tls {
        Some(settings) => Some(
            load_tls_acceptor(settings).context("failed to load TLS certificate and key")?,
        ),
        None => None,
    };

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

    info!(
        "relay listening on {} ({})",
        config.bind_addr,
        if tls.is_some() { "wss" } else { "ws" }
    );

    let relay = Arc::new(Relay::new(&config));
    serve(listener, relay, tls, running).await
}

/// Accepts connections on an already-bound `listener` until `running` is
/// cleared.
///
/// Split out from [`run_server`] so tests can bind an ephemeral port and keep
/// a handle on the [`Relay`].
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    tls: Option<TlsAcceptor>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout on `accept()` lets the loop notice the shutdown
        // flag even when nobody is connecting.
        match timeout(SHUTDOWN_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let relay = Arc::clone(&relay);
                let tls = tls.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, relay, tls).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task: optional TLS, then the relay.
/// Outcomes are logged here; nothing propagates to other connections.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    relay: Arc<Relay>,
    tls: Option<TlsAcceptor>,
) {
    let result = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => relay.accept(tls_stream, peer).await,
            Err(e) => {
                warn!("TLS handshake with {peer} failed: {e}");
                return;
            }
        },
        None => relay.accept(stream, peer).await,
    };

    match result {
        Ok(()) => info!("connection {peer} closed normally"),
        Err(e) if e.is_admission_failure() => info!("connection {peer} refused: {e}"),
        Err(e) => warn!("connection {peer} closed with error: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
