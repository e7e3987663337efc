//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Lifecycle events published by the registry for subscribers

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use parlor_core::{DisplayName, ParticipantId};

use super::participant::{Outbox, Participant, ParticipantInfo};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request/response commands carry a oneshot channel for the reply. The
/// actor handles commands one at a time, so each command is atomic with
/// respect to every other.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a new participant if a slot is free.
    ///
    /// # Errors
    /// - `RegistryError::CapacityFull` if the registry is at capacity
    Join {
        /// Sanitized display name
        name: DisplayName,
        /// Transport handle of the joining connection
        outbox: Outbox,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<Participant, RegistryError>>,
    },

    /// Remove a participant. Removing an absent id is a no-op.
    Leave {
        /// ID of the participant to remove
        id: ParticipantId,
        /// Receives `true` if an entry was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Queue `text` for every participant except `exclude`.
    Broadcast {
        /// Participant that must not receive the text (the author)
        exclude: Option<ParticipantId>,
        /// Rendered message
        text: Arc<str>,
        /// Receives the number of participants the text was queued for
        respond_to: oneshot::Sender<usize>,
    },

    /// Get the current participant count.
    Size {
        /// Channel to send the count
        respond_to: oneshot::Sender<usize>,
    },

    /// Get the roster in ascending id order.
    GetParticipants {
        /// Channel to send the roster
        respond_to: oneshot::Sender<Vec<ParticipantInfo>>,
    },

    /// Evict participants idle longer than the configured timeout.
    ///
    /// Fire-and-forget; sent periodically by the sweep task.
    SweepIdle,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry already holds its maximum number of participants.
    #[error("registry is full (capacity: {capacity} participants)")]
    CapacityFull {
        /// Configured maximum
        capacity: usize,
    },

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Lifecycle events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A participant was admitted.
    Joined {
        /// Assigned id
        id: ParticipantId,
        /// Display name
        name: DisplayName,
    },

    /// A participant was removed.
    Left {
        /// ID of the removed participant
        id: ParticipantId,
        /// Display name
        name: DisplayName,
        /// Why the participant was removed
        reason: RemovalReason,
    },
}

/// Reason why a participant was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection handler left (disconnect, read failure or shutdown).
    Departed,

    /// No chat line within the idle timeout; evicted by the sweep.
    IdleTimeout,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Departed => write!(f, "departed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
        }
    }
}
