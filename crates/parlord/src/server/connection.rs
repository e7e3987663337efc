//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that walks the
//! connection state machine:
//!
//! ```text
//! Connecting ──▶ Active ──▶ Disconnecting ──▶ Closed
//!     │                                          ▲
//!     └──────────── (EOF, refused) ──────────────┘
//! ```
//!
//! - `Connecting`: prompt for a display name until a usable one arrives,
//!   then join the registry and announce the newcomer to everyone
//! - `Active`: relay each input line to every other participant
//! - `Disconnecting`: leave the registry and announce the departure
//! - `Closed`: the writer task has flushed and shut the transport down
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parlor_core::{DisplayName, ParticipantId};
use parlor_protocol::{
    strip_line_terminator, ServerMessage, MAX_LINE_BYTES, NAME_PROMPT, NAME_RETRY,
};

use crate::registry::{self, Inbox, Outbox, Participant, RegistryError, RegistryHandle};

/// Write timeout per message (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Disconnecting,
    Closed,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The client went away (or failed) before choosing a name.
    Abandoned,

    /// The registry was full; the client was told and disconnected.
    Refused,

    /// The participant joined and later left.
    Departed {
        /// Id the participant held
        id: ParticipantId,
        /// Why the participant left
        reason: DepartureReason,
    },
}

/// Why an active participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// Clean end-of-stream from the client
    Disconnected,
    /// Unrecoverable read error
    ReadFailed,
    /// Forcibly evicted by the registry's idle sweep
    Evicted,
    /// The daemon is shutting down
    Shutdown,
}

impl fmt::Display for DepartureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::Evicted => write!(f, "evicted"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Connection handler for a single client.
///
/// Owns the read half of the transport. The write half is handed to a
/// writer task in [`run`](Self::run) and fed through the connection's
/// outbox, which the registry also holds once the client has joined.
pub struct ConnectionHandler<R> {
    /// Buffered reader for incoming lines
    reader: R,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancelled when the daemon shuts down
    shutdown: CancellationToken,

    /// Current lifecycle state
    state: ConnectionState,

    /// Sequence number of this connection (for logging)
    connection_number: u64,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `reader` - Buffered read half of the stream
    /// * `registry` - Handle to the session registry
    /// * `shutdown` - Token cancelled on daemon shutdown
    /// * `connection_number` - Unique number for this connection
    pub fn new(
        reader: R,
        registry: RegistryHandle,
        shutdown: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader,
            registry,
            shutdown,
            state: ConnectionState::Connecting,
            connection_number,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection to completion.
    ///
    /// Spawns the writer task for `writer`, drives the state machine, and
    /// returns once the writer task has flushed and closed the transport.
    pub async fn run<W>(mut self, writer: W) -> ConnectionOutcome
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        debug!(connection = self.connection_number, "New client connected");

        let (outbox, inbox) = registry::outbox();
        let pump = tokio::spawn(pump_outbox(inbox, writer, self.connection_number));

        let outcome = self.serve(outbox).await;
        self.transition(ConnectionState::Closed);

        // Every outbox clone is gone once the participant has left, so the
        // writer drains what is queued and shuts the transport down.
        if let Err(e) = pump.await {
            warn!(connection = self.connection_number, error = %e, "Writer task failed");
        }

        outcome
    }

    async fn serve(&mut self, outbox: Outbox) -> ConnectionOutcome {
        let name = match self.negotiate_name(&outbox).await {
            Ok(Some(name)) => name,
            Ok(None) => return ConnectionOutcome::Abandoned,
            Err(e) => {
                debug!(
                    connection = self.connection_number,
                    error = %e,
                    "Name negotiation failed"
                );
                return ConnectionOutcome::Abandoned;
            }
        };

        let participant = match self.registry.try_join(name.clone(), outbox.clone()).await {
            Ok(participant) => participant,
            Err(RegistryError::CapacityFull { capacity }) => {
                info!(
                    connection = self.connection_number,
                    name = %name,
                    capacity,
                    "Refusing connection, registry is full"
                );
                let _ = outbox.send(ServerMessage::room_full().render().into()).await;
                return ConnectionOutcome::Refused;
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Join failed"
                );
                return ConnectionOutcome::Abandoned;
            }
        };
        drop(outbox);

        self.transition(ConnectionState::Active);
        info!(
            connection = self.connection_number,
            participant_id = %participant.id(),
            name = %participant.name(),
            "Participant connected"
        );

        self.registry
            .broadcast_to_all(ServerMessage::welcome(participant.name()).render())
            .await;

        if self.registry.size().await >= self.registry.capacity() {
            info!(
                capacity = self.registry.capacity(),
                "Participant limit reached"
            );
        }

        let reason = self.relay(&participant).await;

        self.transition(ConnectionState::Disconnecting);
        self.depart(&participant, reason).await;

        ConnectionOutcome::Departed {
            id: participant.id(),
            reason,
        }
    }

    /// Prompts for a display name until a usable one arrives.
    ///
    /// Returns `Ok(None)` if the client hung up or the daemon is shutting
    /// down first.
    async fn negotiate_name(
        &mut self,
        outbox: &Outbox,
    ) -> Result<Option<DisplayName>, ConnectionError> {
        loop {
            send_text(outbox, NAME_PROMPT).await?;

            let read = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                read = read_line(&mut self.reader) => read,
            };

            match read {
                Ok(Some(line)) => match DisplayName::parse(strip_line_terminator(&line)) {
                    Ok(name) => return Ok(Some(name)),
                    Err(e) => {
                        debug!(connection = self.connection_number, error = %e, "Prompting again");
                    }
                },
                Ok(None) => {
                    debug!(
                        connection = self.connection_number,
                        "Client sent EOF before choosing a name"
                    );
                    return Ok(None);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        connection = self.connection_number,
                        error = %e,
                        "Unreadable name line"
                    );
                    send_text(outbox, NAME_RETRY).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Relays input lines until the participant leaves.
    async fn relay(&mut self, participant: &Participant) -> DepartureReason {
        loop {
            let read = tokio::select! {
                _ = participant.evicted() => return DepartureReason::Evicted,
                _ = self.shutdown.cancelled() => return DepartureReason::Shutdown,
                read = read_line(&mut self.reader) => read,
            };

            match read {
                Ok(Some(line)) => {
                    let text =
                        ServerMessage::chat(participant.name(), strip_line_terminator(&line))
                            .render();
                    let delivered = self.registry.broadcast(participant.id(), text).await;
                    debug!(
                        participant_id = %participant.id(),
                        delivered,
                        "Relayed chat line"
                    );
                }
                Ok(None) => {
                    debug!(participant_id = %participant.id(), "Client sent EOF");
                    return DepartureReason::Disconnected;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        participant_id = %participant.id(),
                        error = %e,
                        "Dropping unreadable chat line"
                    );
                }
                Err(e) => {
                    debug!(
                        participant_id = %participant.id(),
                        error = %e,
                        "Read failed"
                    );
                    return DepartureReason::ReadFailed;
                }
            }
        }
    }

    /// Leaves the registry and announces the departure.
    ///
    /// An evicted participant was already removed and announced by the
    /// registry, so its leave is a no-op and no farewell is sent.
    async fn depart(&mut self, participant: &Participant, reason: DepartureReason) {
        if self.registry.leave(participant.id()).await {
            self.registry
                .broadcast_to_all(ServerMessage::farewell(participant.name()).render())
                .await;
        }

        info!(
            participant_id = %participant.id(),
            name = %participant.name(),
            reason = %reason,
            "Participant disconnected"
        );
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(
            connection = self.connection_number,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
    }
}

/// Queues protocol text on the connection's own outbox.
async fn send_text(outbox: &Outbox, text: &str) -> Result<(), ConnectionError> {
    outbox
        .send(Arc::from(text))
        .await
        .map_err(|_| ConnectionError::WriterClosed)
}

/// Reads one `'\n'`-terminated line.
///
/// Returns `Ok(None)` on end-of-stream. A final line without terminator
/// is still returned. At most `MAX_LINE_BYTES` are buffered; the rest of
/// an oversized line is consumed and discarded up to its terminator.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut size = 0usize;

    loop {
        let available = reader
            .fill_buf()
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;
        if available.is_empty() {
            break;
        }

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };

        size += used;
        if size <= MAX_LINE_BYTES {
            buf.extend_from_slice(&available[..used]);
        } else if !buf.is_empty() {
            buf = Vec::new();
        }
        reader.consume(used);

        if done {
            break;
        }
    }

    if size == 0 {
        return Ok(None);
    }

    if size > MAX_LINE_BYTES {
        return Err(ConnectionError::LineTooLong {
            size,
            max: MAX_LINE_BYTES,
        });
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| ConnectionError::InvalidUtf8)
}

/// Writer task: drains the outbox into the transport, then closes it.
async fn pump_outbox<W>(mut inbox: Inbox, writer: W, connection_number: u64)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    while let Some(text) = inbox.recv().await {
        let result = timeout(WRITE_TIMEOUT, async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = connection_number, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                debug!(connection = connection_number, "Write timed out");
                break;
            }
        }
    }

    // Stop accepting messages before closing so senders see a closed outbox
    inbox.close();

    if let Err(e) = writer.shutdown().await {
        debug!(connection = connection_number, error = %e, "Transport shutdown failed");
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("Writer task stopped")]
    WriterClosed,
}

impl ConnectionError {
    /// Returns `true` if the stream is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidUtf8 | Self::LineTooLong { .. })
    }
}
