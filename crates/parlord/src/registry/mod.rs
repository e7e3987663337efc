//! Session registry using Actor pattern.
//!
//! The registry is the single shared mutable structure of the daemon: it
//! tracks connected participants, enforces the capacity limit and fans
//! messages out. It receives commands via a tokio mpsc channel and is the
//! only owner of participant state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│  RegistryActor  │────▶│ Participant      │
//! │  (per client)    │     │                 │     │ outboxes         │
//! └──────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   try_send             │  writer task
//!         │   (mpsc channel)      │   (never blocks)       │  per connection
//!         ▼                       ▼                        ▼
//!    join/leave/broadcast   BTreeMap<ParticipantId,    socket write half
//!                           Member>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

mod actor;
mod commands;
mod handle;
mod participant;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason};
pub use handle::RegistryHandle;
pub use participant::{
    outbox, DeliveryError, Inbox, Outbox, Participant, ParticipantInfo, OUTBOX_BUFFER,
};

/// Default maximum number of concurrent participants.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Capacity and eviction policy for a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of concurrent participants
    pub capacity: usize,

    /// Evict participants with no chat line for this long (None = never)
    pub idle_timeout: Option<Duration>,

    /// How often the idle sweep runs when `idle_timeout` is set
    pub sweep_interval: Duration,
}

impl RegistryConfig {
    /// Creates a config with the given capacity and no idle eviction.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            idle_timeout: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns the idle sweep task if `config.idle_timeout` is set
/// 4. Returns a RegistryHandle for connection handlers
///
/// # Example
///
/// ```no_run
/// use parlord::registry::{spawn_registry, RegistryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistryConfig::with_capacity(10));
///
///     // Use handle to interact with registry
///     let size = handle.size().await;
/// }
/// ```
pub fn spawn_registry(config: RegistryConfig) -> RegistryHandle {
    // Create channels
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    // Create and spawn actor
    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), &config);
    tokio::spawn(actor.run());

    if config.idle_timeout.is_some() {
        spawn_sweep_task(cmd_tx.clone(), config.sweep_interval);
    }

    RegistryHandle::new(cmd_tx, event_tx, config.capacity)
}

/// Spawn a background task that triggers periodic idle sweeps.
fn spawn_sweep_task(sender: mpsc::Sender<RegistryCommand>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // Fire-and-forget sweep command
            if sender.send(RegistryCommand::SweepIdle).await.is_err() {
                // Channel closed, actor stopped - exit sweep task
                debug!("Sweep task stopping: registry channel closed");
                break;
            }
        }
    });
}
