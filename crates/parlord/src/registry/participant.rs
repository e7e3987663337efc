//! Participant handles held by the registry and by connection handlers.
//!
//! A participant's transport is represented by its [`Outbox`]: the sending
//! half of a bounded channel drained by the connection's writer task. The
//! registry only ever pushes into outboxes with `try_send`, so delivering a
//! broadcast never performs I/O and never waits on a slow peer.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use parlor_core::{DisplayName, ParticipantId};

/// Per-connection outbound buffer size (messages, not bytes).
pub const OUTBOX_BUFFER: usize = 256;

/// Sending half of a connection's outbound message queue.
pub type Outbox = mpsc::Sender<Arc<str>>;

/// Receiving half of a connection's outbound message queue.
pub type Inbox = mpsc::Receiver<Arc<str>>;

/// Creates the outbound queue for one connection.
pub fn outbox() -> (Outbox, Inbox) {
    mpsc::channel(OUTBOX_BUFFER)
}

/// Why a message could not be queued for a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The participant's outbox is full; the message was dropped.
    #[error("outbox full")]
    Full,

    /// The participant's writer task has stopped.
    #[error("outbox closed")]
    Closed,
}

/// One connected, named chat user.
///
/// Cheap to clone: the registry keeps one copy and the owning connection
/// handler keeps another. The outbox stays open until every copy is
/// dropped, at which point the writer task closes the transport.
#[derive(Debug, Clone)]
pub struct Participant {
    id: ParticipantId,
    name: DisplayName,
    outbox: Outbox,
    eviction: CancellationToken,
}

impl Participant {
    pub(crate) fn new(id: ParticipantId, name: DisplayName, outbox: Outbox) -> Self {
        Self {
            id,
            name,
            outbox,
            eviction: CancellationToken::new(),
        }
    }

    /// Returns the participant's registry-assigned id.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Returns the participant's display name.
    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// Queues `text` for delivery without waiting.
    pub fn deliver(&self, text: &Arc<str>) -> Result<(), DeliveryError> {
        self.outbox
            .try_send(Arc::clone(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Resolves once the registry has forcibly evicted this participant.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.eviction.cancelled()
    }

    /// Returns `true` if the registry has evicted this participant.
    pub fn is_evicted(&self) -> bool {
        self.eviction.is_cancelled()
    }

    pub(crate) fn evict(&self) {
        self.eviction.cancel();
    }

    /// Returns a transport-free snapshot of this participant.
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Roster entry: who is connected, without their transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    /// Registry-assigned id
    pub id: ParticipantId,
    /// Display name chosen at join time
    pub name: DisplayName,
}
