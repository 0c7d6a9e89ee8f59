//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is populated from CLI arguments / environment variables in `main.rs`,
//! or from [`Default`] in tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use devrelay_core::DEFAULT_KEY_BYTES;

/// Certificate and key files for TLS termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM file holding the certificate chain.
    pub cert_path: PathBuf,
    /// PEM file holding the private key.
    pub key_path: PathBuf,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("assets/development.crt"),
            key_path: PathBuf::from("assets/development.key"),
        }
    }
}

/// All runtime configuration for the relay.
///
/// Build once at startup and share behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use devrelay_server::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(cfg.tls.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// `Some` to terminate TLS in front of the WebSocket handshake.
    pub tls: Option<TlsSettings>,

    /// Upper bound on a single outbound write.
    ///
    /// Applies both to queueing a frame for a destination and to the
    /// destination's writer pushing it onto the socket, so one stalled peer
    /// can hold up its sender for at most this long.
    pub write_timeout: Duration,

    /// Depth of each connection's outbound frame queue.
    pub outbox_capacity: usize,

    /// Maximum number of clients bound to one device; `None` is unlimited.
    pub max_clients_per_device: Option<usize>,

    /// How many candidate keys to draw before reporting the key space as
    /// exhausted.
    pub key_attempts: usize,

    /// Random bytes per device key (rendered as twice as many hex chars).
    pub key_bytes: usize,
}

impl Default for RelayConfig {
    /// | Field                  | Default        |
    /// |------------------------|----------------|
    /// | bind_addr              | `0.0.0.0:8080` |
    /// | tls                    | off            |
    /// | write_timeout          | 5 seconds      |
    /// | outbox_capacity        | 64 frames      |
    /// | max_clients_per_device | unlimited      |
    /// | key_attempts           | 8              |
    /// | key_bytes              | 3              |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tls: None,
            write_timeout: Duration::from_secs(5),
            outbox_capacity: 64,
            max_clients_per_device: None,
            key_attempts: 8,
            key_bytes: DEFAULT_KEY_BYTES,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
