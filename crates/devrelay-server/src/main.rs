//! devrelay: WebSocket rendezvous relay, entry point.
//!
//! A device connects to `/device` and is answered with `{"deviceKey": "..."}`.
//! Clients that know the key connect to `/remote/{key}` and from then on
//! every frame the device sends reaches each of them, and every frame they
//! send reaches the device.
//!
//! # Usage
//!
//! ```text
//! devrelay [OPTIONS]
//!
//! Options:
//!   --port <PORT>                  Listener port [default: 8080]
//!   --bind <ADDR>                  Listener address [default: 0.0.0.0]
//!   --tls                          Serve wss:// instead of ws://
//!   --tls-cert <PATH>              PEM certificate chain [default: assets/development.crt]
//!   --tls-key <PATH>               PEM private key [default: assets/development.key]
//!   --write-timeout-ms <MS>        Per-destination write bound [default: 5000]
//!   --outbox-capacity <N>          Outbound queue depth per connection [default: 64]
//!   --max-clients-per-device <N>   Fan-out cap, 0 = unlimited [default: 0]
//!   --key-attempts <N>             Key draws before giving up [default: 8]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                        | Default   | Description           |
//! |---------------------------------|-----------|-----------------------|
//! | `PORT`                          | `8080`    | Listener port         |
//! | `DEVRELAY_BIND`                 | `0.0.0.0` | Listener address      |
//! | `DEVRELAY_TLS`                  | off       | Enable TLS            |
//! | `DEVRELAY_WRITE_TIMEOUT_MS`     | `5000`    | Write bound (ms)      |
//! | `DEVRELAY_MAX_CLIENTS`          | `0`       | Fan-out cap           |
//!
//! CLI args take precedence over environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devrelay_server::domain::{RelayConfig, TlsSettings};
use devrelay_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket rendezvous relay between one device and many clients.
#[derive(Debug, Parser)]
#[command(
    name = "devrelay",
    about = "Rendezvous relay pairing one device with many clients over WebSocket",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// IP address to bind to.
    ///
    /// `0.0.0.0` accepts connections on every interface; `127.0.0.1` only
    /// local ones.
    #[arg(long, default_value = "0.0.0.0", env = "DEVRELAY_BIND")]
    bind: String,

    /// Terminate TLS using `--tls-cert` and `--tls-key`.
    #[arg(long, env = "DEVRELAY_TLS")]
    tls: bool,

    /// PEM certificate chain used with `--tls`.
    #[arg(long, default_value = "assets/development.crt", env = "DEVRELAY_TLS_CERT")]
    tls_cert: PathBuf,

    /// PEM private key used with `--tls`.
    #[arg(long, default_value = "assets/development.key", env = "DEVRELAY_TLS_KEY")]
    tls_key: PathBuf,

    /// Upper bound, in milliseconds, on delivering one frame to one peer.
    ///
    /// A client that cannot take a frame within this time is disconnected.
    #[arg(long, default_value_t = 5000, env = "DEVRELAY_WRITE_TIMEOUT_MS")]
    write_timeout_ms: u64,

    /// Outbound frame queue depth per connection.
    #[arg(long, default_value_t = 64, env = "DEVRELAY_OUTBOX_CAPACITY")]
    outbox_capacity: usize,

    /// Maximum clients bound to one device; `0` means unlimited.
    #[arg(long, default_value_t = 0, env = "DEVRELAY_MAX_CLIENTS")]
    max_clients_per_device: usize,

    /// Candidate keys drawn before a device registration fails.
    #[arg(long, default_value_t = 8, env = "DEVRELAY_KEY_ATTEMPTS")]
    key_attempts: usize,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address, or if a
    /// numeric setting is zero where zero makes no sense.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        anyhow::ensure!(self.write_timeout_ms > 0, "--write-timeout-ms must be positive");
        anyhow::ensure!(self.outbox_capacity > 0, "--outbox-capacity must be positive");
        anyhow::ensure!(self.key_attempts > 0, "--key-attempts must be positive");

        let tls = self.tls.then(|| TlsSettings {
            cert_path: self.tls_cert,
            key_path: self.tls_key,
        });

        Ok(RelayConfig {
            bind_addr,
            tls,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            outbox_capacity: self.outbox_capacity,
            max_clients_per_device: (self.max_clients_per_device > 0)
                .then_some(self.max_clients_per_device),
            key_attempts: self.key_attempts,
            ..RelayConfig::default()
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. `tracing_subscriber` is initialised; `RUST_LOG` controls the level
///    (default `info`, `RUST_LOG=debug` shows every relayed frame).
/// 2. CLI arguments are parsed into a [`RelayConfig`].
/// 3. A Ctrl+C handler clears the shared `running` flag.
/// 4. [`run_server`] accepts connections until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;

    info!(
        "devrelay starting: bind={}, tls={}, write_timeout={:?}",
        config.bind_addr,
        config.tls.is_some(),
        config.write_timeout
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("devrelay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
