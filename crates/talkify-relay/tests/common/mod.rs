//! Test utilities for relay integration tests.
//!
//! Provides an in-memory message store and channel-backed fake clients that
//! drive real connection pumps against a running hub.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use talkify_relay::{
    read_pump, write_pump, Connection, Frame, HubHandle, MessageStore, OutboundEnvelope,
    StoreError, StoredMessage, UserId,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing for tests (call once per test).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("talkify_relay=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Message store backed by a Vec, with a fixed set of known users.
pub struct MemoryStore {
    users: HashSet<UserId>,
    messages: Mutex<Vec<StoredMessage>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn with_users(ids: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            users: ids.iter().copied().map(UserId).collect(),
            messages: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(0),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every following write fail with a persistence error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn persisted(&self) -> Vec<StoredMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn persisted_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl MessageStore for MemoryStore {
    async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        talkify_relay::validate_content(content)?;

        if !self.users.contains(&receiver) {
            return Err(StoreError::UnknownReceiver);
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::persistence("disk full"));
        }

        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            sender_identity: sender,
            receiver_identity: receiver,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }
}

/// A fake client whose transport is a pair of in-memory channels.
pub struct TestClient {
    pub user: UserId,
    pub connection: Connection,
    inbound: mpsc::UnboundedSender<Result<Frame, String>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TestClient {
    /// Register a connection for `user` and start both pumps.
    pub async fn connect(hub: &HubHandle, user: i64) -> Self {
        let (inbound, inbound_rx) = mpsc::unbounded();
        let (outbound_tx, outbound) = mpsc::unbounded();

        let (connection, queue) = Connection::new(UserId(user), hub.config().outbound_capacity);
        hub.register(connection.clone())
            .await
            .expect("hub should accept registration");

        let writer = tokio::spawn(write_pump(connection.id(), queue, outbound_tx));
        let reader = tokio::spawn(read_pump(
            connection.clone(),
            hub.clone(),
            inbound_rx,
            hub.config().idle_timeout,
        ));

        Self {
            user: UserId(user),
            connection,
            inbound,
            outbound,
            reader,
            writer,
        }
    }

    pub fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::Text(text.to_string())))
            .expect("read pump should be running");
    }

    pub fn send_message(&self, receiver: i64, content: &str) {
        let frame = serde_json::json!({
            "type": "message",
            "content": content,
            "receiver_identity": receiver,
        });
        self.send_text(&frame.to_string());
    }

    /// Simulate a transport read error.
    pub fn fail_transport(&self, error: &str) {
        let _ = self.inbound.unbounded_send(Err(error.to_string()));
    }

    /// Simulate the peer going away.
    pub fn disconnect(&self) {
        self.inbound.close_channel();
    }

    /// Next frame written to the transport.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        timeout(DEFAULT_TIMEOUT, self.outbound.next())
            .await
            .expect("timed out waiting for frame")
    }

    /// Next envelope written to the transport.
    pub async fn recv_envelope(&mut self) -> OutboundEnvelope {
        match self.recv_frame().await {
            Some(Frame::Text(text)) => {
                serde_json::from_str(&text).expect("envelope should be valid JSON")
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    /// Assert nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(frame) = timeout(wait, self.outbound.next()).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    /// Wait for the close frame and for both pumps to finish.
    pub async fn expect_closed(mut self) {
        loop {
            match self.recv_frame().await {
                Some(Frame::Close) | None => break,
                Some(_) => continue,
            }
        }
        timeout(DEFAULT_TIMEOUT, &mut self.writer)
            .await
            .expect("write pump should stop")
            .unwrap();
        timeout(DEFAULT_TIMEOUT, &mut self.reader)
            .await
            .expect("read pump should stop")
            .unwrap();
    }
}

/// Wait until `user` is no longer registered.
pub async fn wait_offline(hub: &HubHandle, user: i64) {
    timeout(DEFAULT_TIMEOUT, async {
        while hub.is_online(UserId(user)).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user should go offline");
}

/// Wait until `user` is registered.
pub async fn wait_online(hub: &HubHandle, user: i64) {
    timeout(DEFAULT_TIMEOUT, async {
        while !hub.is_online(UserId(user)).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user should come online");
}
