//! Chat server for the parlor daemon.
//!
//! The server:
//! - Listens on a TCP or Unix stream socket
//! - Spawns a ConnectionHandler for each client
//! - Logs registry lifecycle events
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │  ChatListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting

mod connection;
mod listener;

pub use connection::{
    ConnectionError, ConnectionHandler, ConnectionOutcome, ConnectionState, DepartureReason,
};
pub use listener::{Accepted, BoxedReader, BoxedWriter, ChatListener};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::registry::{RegistryEvent, RegistryHandle};

/// How long shutdown waits for open connections to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after the first failed accept; doubles per consecutive failure
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Chat server.
///
/// Owns the bound listener and hands each accepted connection to its own
/// handler task.
pub struct ChatServer {
    /// Bound listening socket
    listener: ChatListener,

    /// Human-readable listen endpoint
    endpoint: String,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Tracks handler tasks so shutdown can wait for them
    tracker: TaskTracker,
}

impl ChatServer {
    /// Binds the listening socket described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Listen` if the socket cannot be bound.
    pub async fn bind(
        config: &ServerConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = ChatListener::bind(config).await?;

        Ok(Self {
            listener,
            endpoint: config.endpoint(),
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            tracker: TaskTracker::new(),
        })
    }

    /// Returns the bound TCP address (None for Unix sockets).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits (bounded) for open connections to finish.
    pub async fn run(&self) {
        info!(
            endpoint = %self.endpoint,
            capacity = self.registry.capacity(),
            "Chat server listening"
        );

        self.spawn_event_logger();

        let mut accept_failures: u32 = 0;
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok(accepted) => {
                            accept_failures = 0;
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(accepted, conn_num);
                        }
                        Err(e) => {
                            accept_failures = accept_failures.saturating_add(1);
                            let pause = accept_backoff(accept_failures);
                            error!(
                                error = %e,
                                retry_in_ms = pause.as_millis() as u64,
                                "Failed to accept connection"
                            );
                            tokio::select! {
                                _ = self.cancel_token.cancelled() => {}
                                _ = tokio::time::sleep(pause) => {}
                            }
                        }
                    }
                }
            }
        }

        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open = self.tracker.len(),
                "Connections still open after shutdown grace period"
            );
        }

        self.cleanup();
    }

    /// Spawns a tracked handler task for an accepted connection.
    fn handle_connection(&self, accepted: Accepted, connection_number: u64) {
        let Accepted {
            reader,
            writer,
            peer,
        } = accepted;

        debug!(connection = connection_number, peer = %peer, "Accepted connection");

        let handler = ConnectionHandler::new(
            BufReader::new(reader),
            self.registry.clone(),
            self.cancel_token.clone(),
            connection_number,
        );

        self.tracker.spawn(async move {
            let outcome = handler.run(writer).await;
            debug!(
                connection = connection_number,
                outcome = ?outcome,
                "Connection closed"
            );
        });
    }

    /// Spawns the task that logs registry lifecycle events.
    fn spawn_event_logger(&self) {
        let mut event_rx = self.registry.subscribe();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Event logger shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(RegistryEvent::Joined { id, name }) => {
                                debug!(participant_id = %id, name = %name, "Registry: joined");
                            }
                            Ok(RegistryEvent::Left { id, name, reason }) => {
                                debug!(
                                    participant_id = %id,
                                    name = %name,
                                    reason = %reason,
                                    "Registry: left"
                                );
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event logger lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Removes the Unix socket file, if any.
    pub fn cleanup(&self) {
        self.listener.cleanup();
        info!("Server cleanup complete");
    }
}

/// Pause before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to listen on {endpoint}: {error}")]
    Listen { endpoint: String, error: String },
}
