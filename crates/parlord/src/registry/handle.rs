//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to lifecycle events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Join errors map channel failures to `RegistryError::ChannelClosed`
//! - Other operations degrade to neutral values once the actor is gone

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use parlor_core::{DisplayName, ParticipantId};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::participant::{Outbox, Participant, ParticipantInfo};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let (outbox, inbox) = registry::outbox();
/// let participant = handle.try_join(name, outbox).await?;
///
/// handle.broadcast_to_all(ServerMessage::welcome(participant.name()).render()).await;
/// handle.broadcast(participant.id(), "alice: hi\n").await;
///
/// if handle.leave(participant.id()).await {
///     handle.broadcast_to_all(ServerMessage::farewell(participant.name()).render()).await;
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to lifecycle events
    event_sender: broadcast::Sender<RegistryEvent>,

    /// Capacity the actor was configured with
    capacity: usize,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    /// * `capacity` - The actor's configured capacity
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
        capacity: usize,
    ) -> Self {
        Self {
            sender,
            event_sender,
            capacity,
        }
    }

    /// Admit a participant if a slot is free.
    ///
    /// The capacity check and the insertion happen in one actor step, so
    /// two racing joins can never both take the last slot.
    ///
    /// # Errors
    ///
    /// - `RegistryError::CapacityFull` if the registry is at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn try_join(
        &self,
        name: DisplayName,
        outbox: Outbox,
    ) -> Result<Participant, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Join {
                name,
                outbox,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a participant.
    ///
    /// Idempotent: returns `true` only for the call that actually removed
    /// the entry, `false` if the id was absent (already left or evicted)
    /// or the actor is gone. Does not touch the participant's transport.
    pub async fn leave(&self, id: ParticipantId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Leave { id, respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Send `text` to every participant except `sender`.
    ///
    /// Returns the number of participants the text was queued for.
    pub async fn broadcast(&self, sender: ParticipantId, text: impl Into<Arc<str>>) -> usize {
        self.send_broadcast(Some(sender), text.into()).await
    }

    /// Send `text` to every participant.
    ///
    /// Returns the number of participants the text was queued for.
    pub async fn broadcast_to_all(&self, text: impl Into<Arc<str>>) -> usize {
        self.send_broadcast(None, text.into()).await
    }

    async fn send_broadcast(&self, exclude: Option<ParticipantId>, text: Arc<str>) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Broadcast {
                exclude,
                text,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Get the current participant count.
    ///
    /// Returns 0 if communication with the actor fails.
    pub async fn size(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Size { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Get a consistent roster snapshot in ascending id order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetParticipants { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Trigger an idle sweep.
    ///
    /// This is a fire-and-forget operation - it does not wait for
    /// the sweep to complete.
    pub async fn sweep_idle(&self) {
        // Fire-and-forget: ignore send errors (actor may be shutting down)
        let _ = self.sender.send(RegistryCommand::SweepIdle).await;
    }

    /// Returns the capacity the registry was configured with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to lifecycle events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
