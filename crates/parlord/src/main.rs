//! parlord - multi-user line-based chat server
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default tcp://localhost:1234
//! parlord
//!
//! # Custom port and room size
//! parlord --port 4000 --capacity 20
//!
//! # Unix socket, settings from a file
//! parlord --config /etc/parlor.toml --protocol unix --address /run/parlor.sock
//!
//! # Config file from the environment
//! PARLOR_CONFIG=/etc/parlor.toml parlord
//!
//! # Enable debug logging
//! RUST_LOG=parlord=debug parlord
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parlord::config::{Protocol, ServerConfig};
use parlord::registry::spawn_registry;
use parlord::server::ChatServer;

/// Environment variable naming a config file when `--config` is absent
const CONFIG_ENV: &str = "PARLOR_CONFIG";

/// Log directives used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "parlord=info,parlor_core=info,parlor_protocol=info";

/// parlor daemon - multi-user chat over TCP or Unix sockets
#[derive(Parser, Debug)]
#[command(name = "parlord", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream transport to listen on
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,

    /// Host for TCP, socket path for Unix
    #[arg(short, long)]
    address: Option<String>,

    /// TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent participants
    #[arg(long)]
    capacity: Option<usize>,

    /// Disconnect participants silent for this many seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,
}

impl Args {
    /// Resolves the effective configuration: file first, then flags.
    fn into_config(self) -> Result<ServerConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => ServerConfig::load(&path)?,
            None => ServerConfig::default(),
        };

        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config = args.into_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        endpoint = %config.endpoint(),
        "parlor daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.registry_config());
    info!(
        capacity = config.capacity,
        idle_timeout_secs = ?config.idle_timeout_secs,
        "Session registry started"
    );

    let server = match ChatServer::bind(&config, registry, cancel_token).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        }
    };

    server.run().await;

    info!("parlor daemon stopped");
    Ok(())
}

/// Builds the log filter: `RUST_LOG` when set and valid, otherwise info for
/// the parlor crates.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "parlord",
            "--port",
            "4000",
            "--capacity",
            "3",
            "--idle-timeout",
            "60",
        ]);
        assert!(args.config.is_none());

        let config = args.into_config().unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.capacity, 3);
        assert_eq!(config.idle_timeout_secs, Some(60));
        assert_eq!(config.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_rust_log_overrides_default_filter() {
        let filter = log_filter(Some("parlord=debug")).to_string();
        assert!(filter.contains("parlord=debug"));
        assert!(!filter.contains("parlord=info"));
    }

    #[test]
    fn test_default_filter_without_rust_log() {
        for rust_log in [None, Some(""), Some("parlord=loudest")] {
            let filter = log_filter(rust_log).to_string();
            assert!(filter.contains("parlord=info"), "{rust_log:?} gave {filter}");
            assert!(filter.contains("parlor_protocol=info"));
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let args = Args::parse_from(["parlord", "--capacity", "0"]);
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlor.toml");
        std::fs::write(&path, "port = 5000\ncapacity = 7\n").unwrap();

        let args = Args::parse_from([
            "parlord",
            "--config",
            path.to_str().unwrap(),
            "--protocol",
            "unix",
            "--address",
            "/tmp/parlor.sock",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.capacity, 7);
        assert_eq!(config.protocol, Protocol::Unix);
        assert_eq!(config.address, "/tmp/parlor.sock");
    }
}
