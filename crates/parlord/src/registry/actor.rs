//! Registry actor - owns all participant state and processes commands.
//!
//! The RegistryActor is the single owner of the participant map. It
//! receives commands via an mpsc channel and publishes lifecycle events
//! via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply channel send failures are ignored (the caller went away)
//! - Per-recipient delivery failures are logged and skipped

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use parlor_core::{DisplayName, ParticipantId};
use parlor_protocol::ServerMessage;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason};
use super::participant::{DeliveryError, Outbox, Participant, ParticipantInfo};
use super::RegistryConfig;

/// A registered participant plus the bookkeeping only the actor needs.
#[derive(Debug)]
struct Member {
    participant: Participant,
    last_active: Instant,
}

/// The registry actor - owns all participant state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
///
/// # Ownership
///
/// `members` is keyed by [`ParticipantId`] in a `BTreeMap`, so every
/// iteration (broadcast, roster, sweep) visits participants in ascending
/// id order. Ids come from `next_id`, which only ever increases.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task, which makes every
/// registry operation atomic with respect to every other.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Connected participants in ascending id order
    members: BTreeMap<ParticipantId, Member>,

    /// Next id to hand out; never reused
    next_id: u64,

    /// Maximum concurrent participants
    capacity: usize,

    /// Inactivity limit for the idle sweep (None = never evict)
    idle_timeout: Option<Duration>,

    /// Event publisher for lifecycle subscribers
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `config` - Capacity and idle policy
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            receiver,
            members: BTreeMap::new(),
            next_id: 1,
            capacity: config.capacity,
            idle_timeout: config.idle_timeout,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!(capacity = self.capacity, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            participants = self.members.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Join {
                name,
                outbox,
                respond_to,
            } => {
                let result = self.handle_join(name, outbox);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Leave { id, respond_to } => {
                let removed = self.handle_leave(id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Broadcast {
                exclude,
                text,
                respond_to,
            } => {
                let delivered = self.handle_broadcast(exclude, &text);
                let _ = respond_to.send(delivered);
            }
            RegistryCommand::Size { respond_to } => {
                let _ = respond_to.send(self.members.len());
            }
            RegistryCommand::GetParticipants { respond_to } => {
                let _ = respond_to.send(self.handle_get_participants());
            }
            RegistryCommand::SweepIdle => {
                self.handle_sweep_idle();
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles a join: capacity check and insertion in one step.
    fn handle_join(
        &mut self,
        name: DisplayName,
        outbox: Outbox,
    ) -> Result<Participant, RegistryError> {
        if self.members.len() >= self.capacity {
            warn!(
                name = %name,
                current = self.members.len(),
                capacity = self.capacity,
                "Registry is full, rejecting join"
            );
            return Err(RegistryError::CapacityFull {
                capacity: self.capacity,
            });
        }

        let id = ParticipantId::new(self.next_id);
        self.next_id += 1;

        let participant = Participant::new(id, name, outbox);
        self.members.insert(
            id,
            Member {
                participant: participant.clone(),
                last_active: Instant::now(),
            },
        );

        info!(
            participant_id = %id,
            name = %participant.name(),
            total_participants = self.members.len(),
            "Participant joined"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(RegistryEvent::Joined {
            id,
            name: participant.name().clone(),
        });

        Ok(participant)
    }

    /// Handles a leave. Absent ids are a no-op.
    fn handle_leave(&mut self, id: ParticipantId) -> bool {
        match self.members.remove(&id) {
            Some(member) => {
                let name = member.participant.name().clone();
                info!(
                    participant_id = %id,
                    name = %name,
                    total_participants = self.members.len(),
                    "Participant left"
                );
                let _ = self.event_publisher.send(RegistryEvent::Left {
                    id,
                    name,
                    reason: RemovalReason::Departed,
                });
                true
            }
            None => {
                debug!(participant_id = %id, "Leave for absent participant, ignoring");
                false
            }
        }
    }

    /// Queues `text` for every member except `exclude`, in ascending id order.
    ///
    /// Returns the number of members the text was queued for. A full or
    /// closed outbox only affects that one recipient.
    fn handle_broadcast(&mut self, exclude: Option<ParticipantId>, text: &Arc<str>) -> usize {
        if let Some(sender) = exclude.and_then(|id| self.members.get_mut(&id)) {
            sender.last_active = Instant::now();
        }

        let mut delivered = 0;
        for (id, member) in &self.members {
            if Some(*id) == exclude {
                continue;
            }
            if deliver_logged(&member.participant, text) {
                delivered += 1;
            }
        }

        debug!(
            exclude = ?exclude.map(ParticipantId::get),
            delivered,
            "Broadcast queued"
        );
        delivered
    }

    /// Handles getting the roster.
    fn handle_get_participants(&self) -> Vec<ParticipantInfo> {
        self.members
            .values()
            .map(|member| member.participant.info())
            .collect()
    }

    /// Evicts every member idle for at least the configured timeout.
    ///
    /// Each evicted member is told why together with everyone else, then
    /// removed, then its eviction token is cancelled so the owning
    /// connection handler stops reading.
    fn handle_sweep_idle(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        let now = Instant::now();
        let idle: Vec<ParticipantId> = self
            .members
            .iter()
            .filter(|(_, member)| now.duration_since(member.last_active) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in idle {
            let Some(name) = self
                .members
                .get(&id)
                .map(|member| member.participant.name().clone())
            else {
                continue;
            };

            let notice: Arc<str> = ServerMessage::idle_eviction(&name).render().into();
            self.handle_broadcast(None, &notice);

            if let Some(member) = self.members.remove(&id) {
                member.participant.evict();
                info!(
                    participant_id = %id,
                    name = %name,
                    idle_secs = timeout.as_secs(),
                    total_participants = self.members.len(),
                    "Evicted idle participant"
                );
                let _ = self.event_publisher.send(RegistryEvent::Left {
                    id,
                    name,
                    reason: RemovalReason::IdleTimeout,
                });
            }
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.members.len()
    }
}

/// Queues `text` for one participant, logging a failed delivery.
fn deliver_logged(participant: &Participant, text: &Arc<str>) -> bool {
    match participant.deliver(text) {
        Ok(()) => true,
        Err(DeliveryError::Full) => {
            warn!(
                participant_id = %participant.id(),
                "Outbox full, dropping message"
            );
            false
        }
        Err(DeliveryError::Closed) => {
            debug!(
                participant_id = %participant.id(),
                "Outbox closed, skipping recipient"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::participant::{outbox, Inbox};
    use tokio::sync::oneshot;

    fn create_actor(
        config: RegistryConfig,
    ) -> (
        mpsc::Sender<RegistryCommand>,
        RegistryActor,
        broadcast::Receiver<RegistryEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let actor = RegistryActor::new(cmd_rx, event_tx, &config);
        (cmd_tx, actor, event_rx)
    }

    fn name(raw: &str) -> DisplayName {
        DisplayName::parse(raw).unwrap()
    }

    async fn join(
        actor: &mut RegistryActor,
        raw: &str,
    ) -> (Result<Participant, RegistryError>, Inbox) {
        let (tx, inbox) = outbox();
        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Join {
            name: name(raw),
            outbox: tx,
            respond_to,
        });
        (rx.await.unwrap(), inbox)
    }

    async fn broadcast(
        actor: &mut RegistryActor,
        exclude: Option<ParticipantId>,
        text: &str,
    ) -> usize {
        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Broadcast {
            exclude,
            text: Arc::from(text),
            respond_to,
        });
        rx.await.unwrap()
    }

    async fn leave(actor: &mut RegistryActor, id: ParticipantId) -> bool {
        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Leave { id, respond_to });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_actor_creation() {
        let (_, actor, _) = create_actor(RegistryConfig::default());
        assert_eq!(actor.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_join_assigns_increasing_ids() {
        let (_, mut actor, mut event_rx) = create_actor(RegistryConfig::default());

        let (alice, _a) = join(&mut actor, "alice").await;
        let (bob, _b) = join(&mut actor, "bob").await;
        let alice = alice.unwrap();
        let bob = bob.unwrap();

        assert!(alice.id() < bob.id());
        assert_eq!(actor.participant_count(), 2);

        let event = event_rx.try_recv().unwrap();
        assert_eq!(
            event,
            RegistryEvent::Joined {
                id: alice.id(),
                name: name("alice"),
            }
        );
    }

    #[tokio::test]
    async fn test_join_rejected_at_capacity() {
        let (_, mut actor, _) = create_actor(RegistryConfig::with_capacity(2));

        let (first, _a) = join(&mut actor, "alice").await;
        let (second, _b) = join(&mut actor, "bob").await;
        let (third, _c) = join(&mut actor, "carol").await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(third.unwrap_err(), RegistryError::CapacityFull { capacity: 2 });
        assert_eq!(actor.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_join_consumes_no_id() {
        let (_, mut actor, _) = create_actor(RegistryConfig::with_capacity(1));

        let (alice, _a) = join(&mut actor, "alice").await;
        let alice = alice.unwrap();
        let (rejected, _b) = join(&mut actor, "bob").await;
        assert!(rejected.is_err());

        assert!(leave(&mut actor, alice.id()).await);
        let (carol, _c) = join(&mut actor, "carol").await;
        assert_eq!(carol.unwrap().id().get(), alice.id().get() + 1);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (_, mut actor, mut event_rx) = create_actor(RegistryConfig::default());

        let (alice, _a) = join(&mut actor, "alice").await;
        let alice = alice.unwrap();
        let _ = event_rx.try_recv();

        assert!(leave(&mut actor, alice.id()).await);
        assert!(!leave(&mut actor, alice.id()).await);
        assert!(!leave(&mut actor, ParticipantId::new(999)).await);
        assert_eq!(actor.participant_count(), 0);

        // Exactly one Left event
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            RegistryEvent::Left {
                reason: RemovalReason::Departed,
                ..
            }
        ));
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());

        let (alice, mut alice_inbox) = join(&mut actor, "alice").await;
        let (bob, mut bob_inbox) = join(&mut actor, "bob").await;
        let (_carol, mut carol_inbox) = join(&mut actor, "carol").await;
        let _ = alice.unwrap();
        let bob = bob.unwrap();

        let delivered = broadcast(&mut actor, Some(bob.id()), "bob: hi\n").await;

        assert_eq!(delivered, 2);
        assert_eq!(alice_inbox.try_recv().as_deref().ok(), Some("bob: hi\n"));
        assert_eq!(carol_inbox.try_recv().as_deref().ok(), Some("bob: hi\n"));
        assert!(bob_inbox.try_recv().is_err());
        // Exactly once each
        assert!(alice_inbox.try_recv().is_err());
        assert!(carol_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_all_reaches_everyone() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());

        let (_alice, mut alice_inbox) = join(&mut actor, "alice").await;
        let (_bob, mut bob_inbox) = join(&mut actor, "bob").await;

        assert_eq!(broadcast(&mut actor, None, "> Welcome bob !\n").await, 2);
        assert!(alice_inbox.try_recv().is_ok());
        assert!(bob_inbox.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_recipient() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());

        let (_alice, alice_inbox) = join(&mut actor, "alice").await;
        let (_bob, mut bob_inbox) = join(&mut actor, "bob").await;
        drop(alice_inbox);

        assert_eq!(broadcast(&mut actor, None, "still here\n").await, 1);
        assert_eq!(bob_inbox.try_recv().as_deref().ok(), Some("still here\n"));
        // Dead recipients stay registered until their handler leaves
        assert_eq!(actor.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_get_participants_in_id_order() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());

        let mut keep = Vec::new();
        for raw in ["carol", "alice", "bob"] {
            keep.push(join(&mut actor, raw).await);
        }

        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetParticipants { respond_to });
        let roster = rx.await.unwrap();

        let names: Vec<&str> = roster.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
        assert!(roster.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_size() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());
        let _alice = join(&mut actor, "alice").await;

        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Size { respond_to });
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_without_timeout_is_noop() {
        let (_, mut actor, _) = create_actor(RegistryConfig::default());
        let _alice = join(&mut actor, "alice").await;

        actor.handle_command(RegistryCommand::SweepIdle);
        assert_eq!(actor.participant_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_participants() {
        let config = RegistryConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            ..RegistryConfig::default()
        };
        let (_, mut actor, mut event_rx) = create_actor(config);

        let (alice, mut alice_inbox) = join(&mut actor, "alice").await;
        let (bob, mut bob_inbox) = join(&mut actor, "bob").await;
        let alice = alice.unwrap();
        let bob = bob.unwrap();
        let _ = event_rx.try_recv();
        let _ = event_rx.try_recv();

        tokio::time::advance(Duration::from_secs(45)).await;
        // Bob speaks, resetting his idle clock
        broadcast(&mut actor, Some(bob.id()), "bob: ping\n").await;
        let _ = alice_inbox.try_recv();

        tokio::time::advance(Duration::from_secs(20)).await;
        actor.handle_command(RegistryCommand::SweepIdle);

        assert_eq!(actor.participant_count(), 1);
        assert!(alice.is_evicted());
        assert!(!bob.is_evicted());

        let notice = "> alice was idle too long and was disconnected.\n";
        assert_eq!(alice_inbox.try_recv().as_deref().ok(), Some(notice));
        assert_eq!(bob_inbox.try_recv().as_deref().ok(), Some(notice));

        assert_eq!(
            event_rx.try_recv().unwrap(),
            RegistryEvent::Left {
                id: alice.id(),
                name: name("alice"),
                reason: RemovalReason::IdleTimeout,
            }
        );

        // The handler's own leave after eviction is a no-op
        assert!(!leave(&mut actor, alice.id()).await);
    }
}
