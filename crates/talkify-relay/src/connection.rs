//! Per-connection read and write pumps.
//!
//! Each connection runs two concurrent loops that share only its outbound
//! queue. The read pump decodes client frames and forwards them to the hub;
//! the write pump drains the queue onto the transport. Closing the queue stops
//! both.

use std::fmt;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::hub::HubHandle;
use crate::protocol::{self, InboundEvent, OutboundEnvelope};
use crate::queue::{outbound_queue, EnqueueResult, OutboundQueue, QueueReceiver};
use crate::transport::Frame;
use crate::types::{ConnectionId, UserId};
use crate::RelayError;

/// Handle to one live connection.
///
/// Cloned into the hub's registry entry; the clone and the pumps share the
/// same outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    user: UserId,
    queue: OutboundQueue,
}

impl Connection {
    /// Create a connection for `user` along with the receiving end of its
    /// outbound queue.
    pub fn new(user: UserId, capacity: usize) -> (Self, QueueReceiver) {
        let (queue, receiver) = outbound_queue(capacity);
        (
            Self {
                id: ConnectionId::new(),
                user,
                queue,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Queue an envelope without waiting. A full queue closes the connection.
    pub fn enqueue(&self, envelope: OutboundEnvelope) -> EnqueueResult {
        self.queue.try_enqueue(envelope)
    }

    pub fn close(&self) {
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

enum ReadOutcome<E> {
    Frame(Frame),
    Failed(E),
    Ended,
    Idle,
}

async fn next_frame<S, E>(stream: &mut S, idle_timeout: Option<Duration>) -> ReadOutcome<E>
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return ReadOutcome::Idle,
        },
        None => stream.next().await,
    };

    match next {
        Some(Ok(frame)) => ReadOutcome::Frame(frame),
        Some(Err(e)) => ReadOutcome::Failed(e),
        None => ReadOutcome::Ended,
    }
}

/// Read client frames until the transport ends, goes idle, or the queue is
/// closed, then unregister from the hub.
#[instrument(skip_all, fields(user_id = %connection.user(), connection_id = %connection.id()))]
pub async fn read_pump<S, E>(
    connection: Connection,
    hub: HubHandle,
    mut stream: S,
    idle_timeout: Option<Duration>,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let outcome = tokio::select! {
            biased;
            _ = connection.queue().closed() => {
                debug!("Outbound queue closed, stopping read pump");
                break;
            }
            outcome = next_frame(&mut stream, idle_timeout) => outcome,
        };

        let frame = match outcome {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::Failed(e) => {
                warn!(error = %e, "Transport read failed");
                break;
            }
            ReadOutcome::Ended => {
                debug!("Transport ended");
                break;
            }
            ReadOutcome::Idle => {
                info!("Connection idle, closing");
                break;
            }
        };

        if frame == Frame::Close {
            debug!("Client sent close frame");
            break;
        }

        let Some(payload) = frame.payload() else {
            continue;
        };

        match protocol::decode(payload) {
            Ok(InboundEvent::ChatMessage { receiver, content }) => {
                if let Err(e) = hub.route(connection.user(), receiver, content).await {
                    warn!(error = %e, "Failed to hand message to hub");
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Rejected inbound frame");
                if connection.enqueue(OutboundEnvelope::error(e.to_string()))
                    != EnqueueResult::Queued
                {
                    break;
                }
            }
        }
    }

    match hub.unregister(&connection).await {
        Ok(removed) => debug!(removed, "Read pump finished"),
        Err(e) => debug!(error = %e, "Read pump finished after hub stopped"),
    }
}

/// Drain the outbound queue onto the transport. Sends a close frame once the
/// queue is closed.
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn write_pump<K>(connection_id: ConnectionId, mut queue: QueueReceiver, mut sink: K)
where
    K: Sink<Frame> + Unpin,
    K::Error: fmt::Display,
{
    while let Some(envelope) = queue.next().await {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                continue;
            }
        };

        if let Err(e) = sink.send(Frame::Text(text)).await {
            warn!(error = %e, "Transport write failed");
            queue.close();
            return;
        }
    }

    debug!("Outbound queue closed, sending close frame");
    if let Err(e) = sink.send(Frame::Close).await {
        debug!(error = %e, "Failed to send close frame");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close transport");
    }
}

/// Register a new connection for `user` and run both pumps until it ends.
///
/// The write pump runs on its own task; the read pump runs on the caller's.
/// Returns once both have finished.
pub async fn serve<S, E, K>(hub: HubHandle, user: UserId, stream: S, sink: K) -> Result<(), RelayError>
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
    K: Sink<Frame> + Send + Unpin + 'static,
    K::Error: fmt::Display + Send,
{
    let (connection, queue) = Connection::new(user, hub.config().outbound_capacity);
    let connection_id = connection.id();

    hub.register(connection.clone()).await?;
    info!(user_id = %user, connection_id = %connection_id, "Chat connection established");

    let writer = tokio::spawn(write_pump(connection_id, queue, sink));
    let idle_timeout = hub.config().idle_timeout;

    read_pump(connection, hub, stream, idle_timeout).await;

    if let Err(e) = writer.await {
        warn!(connection_id = %connection_id, error = %e, "Write pump task failed");
    }

    info!(user_id = %user, connection_id = %connection_id, "Chat connection closed");
    Ok(())
}
