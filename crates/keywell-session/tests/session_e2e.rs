//! End-to-end tests over the complete stack: session drivers wired through
//! an in-memory hub, persisting to a shared in-memory store.
//!
//! Flow under test:
//! 1. Drivers spawn, restore or generate pools, and join the hub
//! 2. Stream messages broadcast and decrypt on replica holders only
//! 3. Key exchanges run all five legs over the hub unattended
//! 4. Direct sends resolve recipients through the store's directory
//! 5. Shutdown persists the pool for the next spawn

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use keywell_core::{
    AccessScope, Identity, KeyPoolStore, MemoryStore, PeerId, StreamId, env::test_utils::MockEnv,
};
use keywell_session::{
    IncomingMessage, LinkState, MemoryHub, SessionConfig, SessionDriver, SessionError,
    SessionHandle, SessionNotice,
};
use tokio::{sync::broadcast, time::timeout};

const ALICE: PeerId = 1;
const BOB: PeerId = 2;
const CAROL: PeerId = 3;
const STREAM: StreamId = 0xFEED;

/// Directory id Bob publishes for direct addressing.
const BOB_PUBLIC_ID: u64 = 2002;

const WAIT: Duration = Duration::from_secs(5);

/// Opt-in diagnostics: `RUST_LOG=debug cargo test` shows driver logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn small_config() -> SessionConfig {
    SessionConfig { capacity: 64, ..SessionConfig::default() }
}

async fn spawn_node(
    seed: u64,
    identity: PeerId,
    store: &MemoryStore,
    hub: &MemoryHub,
) -> SessionHandle {
    SessionDriver::spawn(
        MockEnv::with_seed(seed),
        identity,
        small_config(),
        store.clone(),
        hub.attach(identity),
    )
    .await
    .expect("spawn session driver")
}

/// Connects the node and blocks until the link reports connected.
async fn connect_and_wait(handle: &SessionHandle) {
    let mut notices = handle.subscribe();
    handle.connect().await.expect("connect");
    wait_for_notice(&mut notices, |notice| {
        matches!(notice, SessionNotice::ConnectionChanged(LinkState::Connected { .. }))
    })
    .await;
}

async fn wait_for_notice(
    notices: &mut broadcast::Receiver<SessionNotice>,
    want: impl Fn(&SessionNotice) -> bool,
) -> SessionNotice {
    timeout(WAIT, async {
        loop {
            match notices.recv().await {
                Ok(notice) if want(&notice) => return notice,
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => panic!("notice stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a notice")
}

async fn next_message(handle: &mut SessionHandle) -> IncomingMessage {
    timeout(WAIT, handle.recv_message())
        .await
        .expect("timed out waiting for a message")
        .expect("session task alive")
}

#[tokio::test]
async fn stream_message_reaches_replica_holder() {
    init_tracing();
    let hub = MemoryHub::new();
    let store = MemoryStore::new();

    let alice = spawn_node(21, ALICE, &store, &hub).await;
    // The stats round-trip proves the initial persist completed
    assert_eq!(alice.key_stats().await.expect("stats").current, 51);

    // Bob joins the stream by restoring a replica of the mirrored pool
    let replica = store.load_pool(ALICE).await.expect("load").expect("alice snapshot");
    store.save_pool(BOB, replica).await.expect("seed replica");
    let mut bob = spawn_node(22, BOB, &store, &hub).await;
    assert_eq!(bob.key_stats().await.expect("stats").current, 51);

    connect_and_wait(&alice).await;
    connect_and_wait(&bob).await;

    alice.send_message(STREAM, b"replicated hello".to_vec()).await.expect("send");

    let message = next_message(&mut bob).await;
    assert_eq!(message.from, ALICE);
    assert_eq!(message.stream, STREAM);
    assert_eq!(message.plaintext, b"replicated hello");

    // The send left an audit record behind
    let records = store.sent_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender, ALICE);
    assert_eq!(records[0].scope, AccessScope::Stream(STREAM));
    assert!(records[0].bytes > 0);
}

#[tokio::test]
async fn direct_send_resolves_recipient_through_directory() {
    init_tracing();
    let hub = MemoryHub::new();
    let store = MemoryStore::new();
    store.insert_recipient(BOB_PUBLIC_ID, Identity { peer: BOB, display_name: "bob".to_owned() });

    let alice = spawn_node(31, ALICE, &store, &hub).await;
    let mut bob = spawn_node(32, BOB, &store, &hub).await;
    connect_and_wait(&alice).await;
    connect_and_wait(&bob).await;

    // The exchange runs all five legs over the hub unattended
    let mut alice_notices = alice.subscribe();
    let mut bob_notices = bob.subscribe();
    alice.begin_key_exchange(BOB, 4).await.expect("begin exchange");
    wait_for_notice(&mut alice_notices, |notice| {
        matches!(notice, SessionNotice::ExchangeCompleted { peer: BOB, installed: 4 })
    })
    .await;
    wait_for_notice(&mut bob_notices, |notice| {
        matches!(notice, SessionNotice::ExchangeCompleted { peer: ALICE, installed: 4 })
    })
    .await;

    // Four exchanged keys allow exactly four direct sends
    for n in 0..4u8 {
        alice.send_direct(BOB_PUBLIC_ID, vec![n; 4]).await.expect("direct send");
        let message = next_message(&mut bob).await;
        assert_eq!(message.plaintext, vec![n; 4]);
        assert_eq!(message.stream, 0);
    }
    let err = alice.send_direct(BOB_PUBLIC_ID, b"broke".to_vec()).await.unwrap_err();
    assert_eq!(err, SessionError::KeyPoolUnavailable);

    // Identifiers missing from the directory fail fast
    let err = alice.send_direct(9999, b"nobody".to_vec()).await.unwrap_err();
    assert_eq!(err, SessionError::PeerNotFound { peer: 9999 });
}

#[tokio::test]
async fn forced_regeneration_and_restart_preserve_the_pool() {
    init_tracing();
    let hub = MemoryHub::new();
    let store = MemoryStore::new();

    let alice = spawn_node(41, ALICE, &store, &hub).await;
    connect_and_wait(&alice).await;
    assert_eq!(alice.key_stats().await.expect("stats").current, 51);

    // Forced regeneration ignores the threshold and tops the pool up
    alice.regenerate_keys(true).await.expect("regenerate");
    assert_eq!(alice.key_stats().await.expect("stats").current, 64);

    for n in 0..3u8 {
        alice.send_message(STREAM, vec![n; 8]).await.expect("send");
    }
    assert_eq!(alice.key_stats().await.expect("stats").current, 61);

    // Shutdown persists; the next spawn restores size and capacity
    alice.shutdown().await;
    let revived = SessionDriver::spawn(
        MockEnv::with_seed(42),
        ALICE,
        SessionConfig::default(),
        store.clone(),
        hub.attach(ALICE),
    )
    .await
    .expect("respawn");
    let stats = revived.key_stats().await.expect("stats");
    assert_eq!(stats.current, 61);
    assert_eq!(stats.capacity, 64);
}

#[tokio::test]
async fn unrelated_identity_ignores_foreign_traffic() {
    init_tracing();
    let hub = MemoryHub::new();
    let store = MemoryStore::new();

    let alice = spawn_node(51, ALICE, &store, &hub).await;
    let mut carol = spawn_node(53, CAROL, &store, &hub).await;
    connect_and_wait(&alice).await;
    connect_and_wait(&carol).await;

    // Carol holds her own pool, not a replica, so the envelope is not hers
    alice.send_message(STREAM, b"not for carol".to_vec()).await.expect("send");

    let silent = timeout(Duration::from_millis(300), carol.recv_message()).await;
    assert!(silent.is_err(), "carol must not decrypt foreign traffic");
    // Her pool was untouched by the failed lookup
    assert_eq!(carol.key_stats().await.expect("stats").current, 51);
}
