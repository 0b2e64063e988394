//! Bounded, closable outbound queue.
//!
//! Producers never block: [`OutboundQueue::try_enqueue`] either queues the
//! envelope or closes the queue. Closing is the cancellation signal for both
//! pumps of the owning connection.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::OutboundEnvelope;

/// Default per-connection queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Result of attempting to queue an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Envelope was queued for the write pump
    Queued,
    /// Queue was full; it has now been closed
    Overflow,
    /// Queue was already closed
    Closed,
}

/// Producer side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    sender: mpsc::Sender<OutboundEnvelope>,
    closed: CancellationToken,
}

/// Consumer side, owned by the write pump.
#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::Receiver<OutboundEnvelope>,
    closed: CancellationToken,
}

/// Create a queue holding at most `capacity` envelopes.
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, QueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        OutboundQueue {
            sender,
            closed: closed.clone(),
        },
        QueueReceiver { receiver, closed },
    )
}

impl OutboundQueue {
    /// Queue an envelope without waiting.
    pub fn try_enqueue(&self, envelope: OutboundEnvelope) -> EnqueueResult {
        if self.closed.is_cancelled() {
            return EnqueueResult::Closed;
        }

        match self.sender.try_send(envelope) {
            Ok(()) => EnqueueResult::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close();
                EnqueueResult::Overflow
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                EnqueueResult::Closed
            }
        }
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the queue is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl QueueReceiver {
    /// Next queued envelope, or `None` once the queue is closed.
    ///
    /// Envelopes still buffered when the queue closes are discarded.
    pub async fn next(&mut self) -> Option<OutboundEnvelope> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            envelope = self.receiver.recv() => envelope,
        }
    }

    /// Close the queue from the consumer side.
    pub fn close(&self) {
        self.closed.cancel();
    }
}
