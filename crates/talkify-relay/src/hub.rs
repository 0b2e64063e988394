//! Routing hub.
//!
//! A single control loop owns the identity → connection map. Every mutation
//! and every routing decision arrives as a [`Command`] on one channel and is
//! handled to completion before the next, so the map needs no locks.
//!
//! ```ignore
//! let hub = Hub::new(store, HubConfig::default()).start();
//!
//! let (connection, queue) = Connection::new(user, hub.config().outbound_capacity);
//! hub.register(connection.clone()).await?;
//! hub.route(user, peer, "hi".to_string()).await?;
//!
//! hub.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::connection::Connection;
use crate::metrics;
use crate::protocol::OutboundEnvelope;
use crate::queue::{EnqueueResult, DEFAULT_OUTBOUND_CAPACITY};
use crate::types::{ConnectionId, StoredMessage, UserId};
use crate::{MessageStore, RelayError, StoreError};

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the control channel
    pub command_capacity: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_capacity: usize,
    /// Close connections that send nothing for this long (`None` disables)
    pub idle_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

enum Command {
    Register {
        connection: Connection,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        user: UserId,
        connection_id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Route {
        sender: UserId,
        receiver: UserId,
        content: String,
    },
    Broadcast {
        user: UserId,
        message: StoredMessage,
        reply: oneshot::Sender<bool>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<UserId>>,
    },
    IsOnline {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
}

/// The control loop state. Construct with [`Hub::new`] and run with
/// [`Hub::start`].
pub struct Hub<S> {
    store: S,
    config: HubConfig,
    connections: HashMap<UserId, Connection>,
}

impl<S: MessageStore> Hub<S> {
    pub fn new(store: S, config: HubConfig) -> Self {
        Self {
            store,
            config,
            connections: HashMap::new(),
        }
    }

    /// Spawn the control loop and return a handle to it.
    pub fn start(self) -> HubHandle {
        let (commands, receiver) = mpsc::channel(self.config.command_capacity.max(1));
        let shutdown = CancellationToken::new();
        let config = Arc::new(self.config.clone());

        let task = tokio::spawn(
            self.run(receiver, shutdown.clone())
                .instrument(info_span!("hub")),
        );

        HubHandle {
            commands,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
            config,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        info!(
            outbound_capacity = self.config.outbound_capacity,
            "Hub control loop started"
        );

        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }

        self.close_all();
        info!("Hub control loop stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { connection, reply } => {
                self.register(connection);
                let _ = reply.send(());
            }
            Command::Unregister {
                user,
                connection_id,
                reply,
            } => {
                let removed = self.evict(user, connection_id);
                let _ = reply.send(removed);
            }
            Command::Route {
                sender,
                receiver,
                content,
            } => {
                self.route(sender, receiver, content).await;
            }
            Command::Broadcast {
                user,
                message,
                reply,
            } => {
                let delivered = self.deliver(user, OutboundEnvelope::delivered(message));
                let _ = reply.send(delivered);
            }
            Command::OnlineUsers { reply } => {
                let mut users: Vec<UserId> = self.connections.keys().copied().collect();
                users.sort();
                let _ = reply.send(users);
            }
            Command::IsOnline { user, reply } => {
                let _ = reply.send(self.connections.contains_key(&user));
            }
        }
    }

    /// Install `connection`, closing whatever it replaces.
    #[instrument(skip_all, fields(user_id = %connection.user(), connection_id = %connection.id()))]
    fn register(&mut self, connection: Connection) {
        let user = connection.user();

        if let Some(previous) = self.connections.remove(&user) {
            if previous.id() != connection.id() {
                previous.close();
                info!(replaced = %previous.id(), "Replaced existing connection");
            }
        }

        self.connections.insert(user, connection);
        metrics::record_connection_count(self.connections.len());
        debug!(online = self.connections.len(), "Connection registered");
    }

    /// Remove the entry for `user` only if it is still `connection_id`.
    fn evict(&mut self, user: UserId, connection_id: ConnectionId) -> bool {
        match self.connections.get(&user) {
            Some(current) if current.id() == connection_id => {
                if let Some(connection) = self.connections.remove(&user) {
                    connection.close();
                }
                metrics::record_connection_count(self.connections.len());
                debug!(user_id = %user, connection_id = %connection_id, "Connection unregistered");
                true
            }
            _ => false,
        }
    }

    /// Persist then fan out. Returns whether the receiver got the message.
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn route(&mut self, sender: UserId, receiver: UserId, content: String) -> bool {
        let started = Instant::now();

        let message = match self.store.send(sender, receiver, &content).await {
            Ok(message) => message,
            Err(err) => {
                match &err {
                    StoreError::Persistence(detail) => {
                        error!(error = %detail, "Failed to persist message")
                    }
                    other => debug!(error = %other, "Message rejected"),
                }
                metrics::record_rejected(err.kind());
                self.deliver(sender, OutboundEnvelope::error(err.client_message()));
                return false;
            }
        };

        let message_id = message.id;
        let envelope = OutboundEnvelope::delivered(message);

        // A self-addressed message is delivered once; the sender is the receiver.
        let receiver_online = if receiver != sender {
            let online = self.deliver(receiver, envelope.clone());
            self.deliver(sender, envelope);
            online
        } else {
            self.deliver(sender, envelope)
        };

        metrics::record_routed(receiver_online);
        metrics::record_route_latency(started.elapsed().as_secs_f64() * 1000.0);
        debug!(message_id, receiver_online, "Message routed");
        receiver_online
    }

    /// Queue an envelope for `user` if online. A full or closed queue evicts
    /// that connection.
    fn deliver(&mut self, user: UserId, envelope: OutboundEnvelope) -> bool {
        let Some(connection) = self.connections.get(&user) else {
            return false;
        };

        match connection.enqueue(envelope) {
            EnqueueResult::Queued => true,
            result => {
                let connection_id = connection.id();
                let reason = if result == EnqueueResult::Overflow {
                    "overflow"
                } else {
                    "closed"
                };
                warn!(
                    user_id = %user,
                    connection_id = %connection_id,
                    reason,
                    "Outbound queue unavailable, dropping connection"
                );
                metrics::record_dropped(reason);
                self.evict(user, connection_id);
                false
            }
        }
    }

    fn close_all(&mut self) {
        let count = self.connections.len();
        for (_, connection) in self.connections.drain() {
            connection.close();
        }
        metrics::record_connection_count(0);
        if count > 0 {
            info!(count, "Closed all connections");
        }
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::HubStopped);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::HubStopped)
    }

    /// Register a connection. Any connection already registered for the same
    /// user is closed before this returns.
    pub async fn register(&self, connection: Connection) -> Result<(), RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Register { connection, reply }).await?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    /// Close `connection` and remove it from the registry if it is still the
    /// registered instance. Returns whether an entry was removed.
    pub async fn unregister(&self, connection: &Connection) -> Result<bool, RelayError> {
        connection.close();
        let (reply, response) = oneshot::channel();
        self.send(Command::Unregister {
            user: connection.user(),
            connection_id: connection.id(),
            reply,
        })
        .await?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    /// Submit a chat message. Results reach the sender as envelopes.
    pub async fn route(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> Result<(), RelayError> {
        self.send(Command::Route {
            sender,
            receiver,
            content,
        })
        .await
    }

    /// Deliver an already persisted message to `user` if online.
    pub async fn broadcast(&self, user: UserId, message: StoredMessage) -> Result<bool, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Broadcast {
            user,
            message,
            reply,
        })
        .await?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    /// Currently registered users, ascending.
    pub async fn online_users(&self) -> Result<Vec<UserId>, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::OnlineUsers { reply }).await?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    pub async fn is_online(&self, user: UserId) -> Result<bool, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::IsOnline { user, reply }).await?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    /// Stop the control loop, close every connection and wait for the loop to
    /// exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Hub task ended abnormally");
            }
        }
    }
}
