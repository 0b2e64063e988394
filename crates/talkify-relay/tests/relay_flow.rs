//! End-to-end routing tests: real hub, real pumps, in-memory transports.

mod common;

use std::time::Duration;

use common::{init_tracing, wait_offline, wait_online, MemoryStore, TestClient, DEFAULT_TIMEOUT};
use futures::channel::mpsc;
use talkify_relay::{
    serve, Connection, Frame, Hub, HubConfig, HubHandle, OutboundEnvelope, UserId,
};
use tokio::time::timeout;

const QUIET: Duration = Duration::from_millis(150);

fn start_hub(store: std::sync::Arc<MemoryStore>) -> HubHandle {
    init_tracing();
    Hub::new(store, HubConfig::default()).start()
}

#[tokio::test]
async fn test_message_reaches_receiver_and_acks_sender() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    let mut bob = TestClient::connect(&hub, 2).await;

    alice.send_message(2, "hi");

    let delivered = bob.recv_envelope().await;
    // persisted before anyone saw it
    assert_eq!(store.persisted_count(), 1);

    let message = delivered.message().expect("delivered envelope").clone();
    assert_eq!(message.sender_identity, UserId(1));
    assert_eq!(message.receiver_identity, UserId(2));
    assert_eq!(message.content, "hi");
    assert_eq!(message.id, store.persisted()[0].id);

    let ack = alice.recv_envelope().await;
    assert_eq!(ack.message(), Some(&message));

    bob.expect_silence(QUIET).await;
    alice.expect_silence(QUIET).await;

    hub.shutdown().await;
}

#[tokio::test]
async fn test_offline_receiver_is_persisted_and_sender_acked() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    alice.send_message(2, "are you there?");

    let ack = alice.recv_envelope().await;
    assert_eq!(ack.message().map(|m| m.receiver_identity), Some(UserId(2)));
    assert_eq!(store.persisted_count(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_invalid_content_is_rejected_without_persisting() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    let mut bob = TestClient::connect(&hub, 2).await;

    alice.send_message(2, "");

    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("invalid message content"));
    assert_eq!(store.persisted_count(), 0);
    bob.expect_silence(QUIET).await;

    alice.send_message(2, " \t\n ");
    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("invalid message content"));
    assert_eq!(store.persisted_count(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_unknown_receiver_is_reported() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    alice.send_message(99, "hello?");

    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("receiver not found"));
    assert_eq!(store.persisted_count(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_persistence_failure_is_generic_and_not_fanned_out() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    let mut bob = TestClient::connect(&hub, 2).await;

    store.set_failing(true);
    alice.send_message(2, "hi");

    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("failed to send message"));
    bob.expect_silence(QUIET).await;

    // the loop survives store failures
    store.set_failing(false);
    alice.send_message(2, "again");
    assert_eq!(bob.recv_envelope().await.message().map(|m| m.content.as_str()), Some("again"));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;

    alice.send_text("this is not json");
    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("Invalid message format"));

    alice.send_text(r#"{"type":"typing","receiver_identity":2}"#);
    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.error_text(), Some("Unknown message type: typing"));

    assert!(hub.is_online(UserId(1)).await.unwrap());
    assert_eq!(store.persisted_count(), 0);

    alice.send_message(2, "still here");
    assert!(alice.recv_envelope().await.message().is_some());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_binary_frames_are_decoded_and_pings_ignored() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let (inbound, inbound_rx) = mpsc::unbounded::<Result<Frame, String>>();
    let (outbound_tx, mut outbound) = mpsc::unbounded::<Frame>();
    let (connection, queue) = Connection::new(UserId(1), 16);
    hub.register(connection.clone()).await.unwrap();
    tokio::spawn(talkify_relay::write_pump(connection.id(), queue, outbound_tx));
    tokio::spawn(talkify_relay::read_pump(connection, hub.clone(), inbound_rx, None));

    inbound.unbounded_send(Ok(Frame::Ping(vec![1]))).unwrap();
    inbound
        .unbounded_send(Ok(Frame::Binary(
            br#"{"type":"message","content":"bytes","receiver_identity":2}"#.to_vec(),
        )))
        .unwrap();

    let frame = timeout(DEFAULT_TIMEOUT, futures::StreamExt::next(&mut outbound))
        .await
        .unwrap()
        .unwrap();
    let Frame::Text(text) = frame else {
        panic!("expected text frame");
    };
    let envelope: OutboundEnvelope = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope.message().map(|m| m.content.as_str()), Some("bytes"));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_message_to_self_is_delivered_once() {
    let store = MemoryStore::with_users(&[1]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    alice.send_message(1, "note to self");

    let envelope = alice.recv_envelope().await;
    assert_eq!(envelope.message().map(|m| m.receiver_identity), Some(UserId(1)));
    alice.expect_silence(QUIET).await;

    hub.shutdown().await;
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let first = TestClient::connect(&hub, 1).await;
    let first_connection = first.connection.clone();
    let mut second = TestClient::connect(&hub, 1).await;

    // the superseded connection is closed before the new one becomes routable
    assert!(first_connection.is_closed());
    first.expect_closed().await;

    // the stale pump's unregister must not remove the new entry
    assert!(hub.is_online(UserId(1)).await.unwrap());
    assert_eq!(hub.online_users().await.unwrap(), vec![UserId(1)]);

    let bob = TestClient::connect(&hub, 2).await;
    bob.send_message(1, "which one?");
    let envelope = second.recv_envelope().await;
    assert_eq!(envelope.message().map(|m| m.content.as_str()), Some("which one?"));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_closes_only_that_connection() {
    let store = MemoryStore::with_users(&[1, 2, 3]);
    let hub = start_hub(store.clone());

    let mut alice = TestClient::connect(&hub, 1).await;
    let mut carol = TestClient::connect(&hub, 3).await;

    // bob never drains his queue
    let (bob, _bob_queue) = Connection::new(UserId(2), 2);
    hub.register(bob.clone()).await.unwrap();

    for i in 0..3 {
        alice.send_message(2, &format!("flood {}", i));
    }
    for _ in 0..3 {
        assert!(alice.recv_envelope().await.message().is_some());
    }

    assert!(bob.is_closed());
    assert!(!hub.is_online(UserId(2)).await.unwrap());
    assert_eq!(store.persisted_count(), 3);

    alice.send_message(3, "unaffected");
    let envelope = carol.recv_envelope().await;
    assert_eq!(envelope.message().map(|m| m.content.as_str()), Some("unaffected"));
    assert!(!alice.connection.is_closed());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_malformed_flood_closes_undrained_connection() {
    let store = MemoryStore::with_users(&[1]);
    let hub = start_hub(store.clone());

    // no write pump, so error envelopes pile up in a two-slot queue
    let (inbound, inbound_rx) = mpsc::unbounded::<Result<Frame, String>>();
    let (connection, _queue) = Connection::new(UserId(1), 2);
    hub.register(connection.clone()).await.unwrap();
    let reader = tokio::spawn(talkify_relay::read_pump(
        connection.clone(),
        hub.clone(),
        inbound_rx,
        None,
    ));

    for _ in 0..3 {
        let _ = inbound.unbounded_send(Ok(Frame::Text("not json".to_string())));
    }

    timeout(DEFAULT_TIMEOUT, reader)
        .await
        .expect("read pump should stop on overflow")
        .unwrap();
    assert!(connection.is_closed());
    assert!(!hub.is_online(UserId(1)).await.unwrap());
    assert_eq!(store.persisted_count(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let store = MemoryStore::with_users(&[1]);
    let hub = start_hub(store);

    let alice = TestClient::connect(&hub, 1).await;
    alice.disconnect();
    alice.expect_closed().await;

    wait_offline(&hub, 1).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_unregisters() {
    let store = MemoryStore::with_users(&[1]);
    let hub = start_hub(store);

    let alice = TestClient::connect(&hub, 1).await;
    alice.fail_transport("connection reset");
    alice.expect_closed().await;

    wait_offline(&hub, 1).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    init_tracing();
    let store = MemoryStore::with_users(&[1]);
    let config = HubConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..HubConfig::default()
    };
    let hub = Hub::new(store, config).start();

    let alice = TestClient::connect(&hub, 1).await;
    alice.expect_closed().await;

    wait_offline(&hub, 1).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store);

    let alice = TestClient::connect(&hub, 1).await;
    let bob = TestClient::connect(&hub, 2).await;

    hub.shutdown().await;

    alice.expect_closed().await;
    bob.expect_closed().await;
}

#[tokio::test]
async fn test_serve_runs_until_peer_leaves() {
    let store = MemoryStore::with_users(&[1, 2]);
    let hub = start_hub(store.clone());

    let (inbound, inbound_rx) = mpsc::unbounded::<Result<Frame, String>>();
    let (outbound_tx, mut outbound) = mpsc::unbounded::<Frame>();
    let session = tokio::spawn(serve(hub.clone(), UserId(1), inbound_rx, outbound_tx));

    wait_online(&hub, 1).await;

    let mut bob = TestClient::connect(&hub, 2).await;
    inbound
        .unbounded_send(Ok(Frame::Text(
            r#"{"type":"message","content":"via serve","receiver_identity":2}"#.to_string(),
        )))
        .unwrap();
    assert_eq!(
        bob.recv_envelope().await.message().map(|m| m.sender_identity),
        Some(UserId(1))
    );

    inbound.close_channel();
    let result = timeout(DEFAULT_TIMEOUT, session).await.unwrap().unwrap();
    assert!(result.is_ok());

    // drain until the transport is closed
    let mut saw_close = false;
    while let Some(frame) = futures::StreamExt::next(&mut outbound).await {
        if frame == Frame::Close {
            saw_close = true;
        }
    }
    assert!(saw_close);
    wait_offline(&hub, 1).await;

    hub.shutdown().await;
}
