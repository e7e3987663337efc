//! End-to-end tests for the session registry running as a spawned actor.

use std::collections::HashSet;
use std::time::Duration;

use parlor_core::DisplayName;
use parlor_protocol::ServerMessage;
use parlord::registry::{
    outbox, spawn_registry, Inbox, Participant, RegistryConfig, RegistryError, RegistryEvent,
    RegistryHandle, RemovalReason,
};

fn name(raw: &str) -> DisplayName {
    DisplayName::parse(raw).unwrap()
}

async fn join(registry: &RegistryHandle, raw: &str) -> (Participant, Inbox) {
    let (tx, inbox) = outbox();
    let participant = registry.try_join(name(raw), tx).await.unwrap();
    (participant, inbox)
}

fn drain(inbox: &mut Inbox) -> Vec<String> {
    let mut seen = Vec::new();
    while let Ok(text) = inbox.try_recv() {
        seen.push(text.to_string());
    }
    seen
}

#[tokio::test]
async fn test_capacity_refuses_third_join() {
    let registry = spawn_registry(RegistryConfig::with_capacity(2));

    let (_alice, _a) = join(&registry, "alice").await;
    let (_bob, _b) = join(&registry, "bob").await;

    let (tx, _c) = outbox();
    let result = registry.try_join(name("carol"), tx).await;
    assert!(matches!(
        result,
        Err(RegistryError::CapacityFull { capacity: 2 })
    ));
    assert_eq!(registry.size().await, 2);
}

#[tokio::test]
async fn test_broadcast_excludes_sender() {
    let registry = spawn_registry(RegistryConfig::default());
    let (_alice, mut alice_rx) = join(&registry, "alice").await;
    let (bob, mut bob_rx) = join(&registry, "bob").await;
    let (_carol, mut carol_rx) = join(&registry, "carol").await;

    let text = ServerMessage::chat(bob.name(), "hi").render();
    assert_eq!(registry.broadcast(bob.id(), text).await, 2);

    assert_eq!(drain(&mut alice_rx), vec!["bob: hi\n"]);
    assert_eq!(drain(&mut carol_rx), vec!["bob: hi\n"]);
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn test_departure_shrinks_roster_and_ids_are_fresh() {
    let registry = spawn_registry(RegistryConfig::default());
    let (alice, _alice_rx) = join(&registry, "alice").await;
    let (bob, mut bob_rx) = join(&registry, "bob").await;
    let (carol, mut carol_rx) = join(&registry, "carol").await;

    assert!(registry.leave(alice.id()).await);
    registry
        .broadcast_to_all(ServerMessage::farewell(alice.name()).render())
        .await;

    assert_eq!(registry.size().await, 2);
    assert_eq!(drain(&mut bob_rx), vec!["> See you later alice !\n"]);
    assert_eq!(drain(&mut carol_rx), vec!["> See you later alice !\n"]);

    let (dave, _dave_rx) = join(&registry, "dave").await;
    let ids: Vec<_> = registry.participants().await.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![bob.id(), carol.id(), dave.id()]);
    assert_ne!(dave.id(), alice.id());
    assert!(dave.id() > carol.id());
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let registry = spawn_registry(RegistryConfig::default());
    let (alice, _rx) = join(&registry, "alice").await;

    assert!(registry.leave(alice.id()).await);
    assert!(!registry.leave(alice.id()).await);
    assert_eq!(registry.size().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_for_last_slot() {
    let registry = spawn_registry(RegistryConfig::with_capacity(3));
    let (_a, _a_rx) = join(&registry, "alice").await;
    let (_b, _b_rx) = join(&registry, "bob").await;

    let attempts: Vec<_> = ["carol", "dave"]
        .into_iter()
        .map(|raw| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let (tx, inbox) = outbox();
                let result = registry.try_join(name(raw), tx).await;
                (result, inbox)
            })
        })
        .collect();

    let mut admitted = 0;
    let mut refused = 0;
    let mut inboxes = Vec::new();
    for attempt in attempts {
        let (result, inbox) = attempt.await.unwrap();
        match result {
            Ok(_) => admitted += 1,
            Err(RegistryError::CapacityFull { .. }) => refused += 1,
            Err(e) => panic!("unexpected join error: {e}"),
        }
        inboxes.push(inbox);
    }

    assert_eq!(admitted, 1);
    assert_eq!(refused, 1);
    assert_eq!(registry.size().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_get_unique_ids() {
    let registry = spawn_registry(RegistryConfig::with_capacity(64));

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let (tx, inbox) = outbox();
                let participant = registry
                    .try_join(name(&format!("user{i}")), tx)
                    .await
                    .unwrap();
                (participant.id(), inbox)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut inboxes = Vec::new();
    for task in tasks {
        let (id, inbox) = task.await.unwrap();
        assert!(ids.insert(id), "duplicate id {id}");
        inboxes.push(inbox);
    }

    assert_eq!(registry.size().await, 64);
    let roster = registry.participants().await;
    assert!(roster.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn test_dead_outbox_does_not_block_broadcast() {
    let registry = spawn_registry(RegistryConfig::default());
    let (alice, _alice_rx) = join(&registry, "alice").await;
    let (_bob, bob_rx) = join(&registry, "bob").await;
    let (_carol, mut carol_rx) = join(&registry, "carol").await;
    drop(bob_rx);

    let delivered = registry.broadcast(alice.id(), "alice: still here?\n").await;
    assert_eq!(delivered, 1);
    assert_eq!(drain(&mut carol_rx), vec!["alice: still here?\n"]);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let registry = spawn_registry(RegistryConfig::default());
    let mut events = registry.subscribe();

    let (alice, _rx) = join(&registry, "alice").await;
    registry.leave(alice.id()).await;

    match events.recv().await.unwrap() {
        RegistryEvent::Joined { id, name } => {
            assert_eq!(id, alice.id());
            assert_eq!(name.as_str(), "alice");
        }
        other => panic!("expected Joined, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        RegistryEvent::Left { id, reason, .. } => {
            assert_eq!(id, alice.id());
            assert_eq!(reason, RemovalReason::Departed);
        }
        other => panic!("expected Left, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_participant_is_evicted() {
    let registry = spawn_registry(RegistryConfig {
        idle_timeout: Some(Duration::from_secs(30)),
        sweep_interval: Duration::from_secs(1),
        ..RegistryConfig::default()
    });

    let (quiet, mut quiet_rx) = join(&registry, "quiet").await;
    let (chatty, mut chatty_rx) = join(&registry, "chatty").await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        registry.broadcast(chatty.id(), "chatty: ping\n").await;
    }

    quiet.evicted().await;
    assert!(quiet.is_evicted());
    assert!(!chatty.is_evicted());

    let roster = registry.participants().await;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, chatty.id());

    // A natural disconnect after eviction removes nothing
    assert!(!registry.leave(quiet.id()).await);

    let notice = "> quiet was idle too long and was disconnected.\n";
    assert!(drain(&mut chatty_rx).contains(&notice.to_string()));
    assert_eq!(drain(&mut quiet_rx).last().map(String::as_str), Some(notice));
}
