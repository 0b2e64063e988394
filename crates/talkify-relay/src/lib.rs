//! Talkify real-time chat relay.
//!
//! Relays chat messages between authenticated users while persisting every
//! message before it is delivered. The pieces:
//!
//! - [`Hub`]: single control loop owning the user → connection registry and
//!   all routing decisions
//! - [`Connection`]: one transport with a read pump and a write pump sharing
//!   a bounded, closable outbound queue
//! - [`MessageStore`]: validates and persists messages on the hub's behalf
//!
//! The relay is transport-neutral. A host feeds it a stream of [`Frame`]s and
//! a sink accepting them, typically adapted from a WebSocket.

use std::future::Future;

pub mod connection;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod types;
pub mod validation;

pub use connection::{read_pump, serve, write_pump, Connection};
pub use error::{RelayError, StoreError};
pub use hub::{Hub, HubConfig, HubHandle};
pub use protocol::{decode, DecodeError, InboundEvent, OutboundEnvelope};
pub use queue::{outbound_queue, EnqueueResult, OutboundQueue, QueueReceiver, DEFAULT_OUTBOUND_CAPACITY};
pub use transport::Frame;
pub use types::{ConnectionId, StoredMessage, UserId};
pub use validation::{validate_content, MAX_CONTENT_LENGTH};

/// Persistence collaborator used by the hub.
///
/// Called from inside the hub's control loop, so a message is always stored
/// before any connection sees it.
pub trait MessageStore: Send + Sync + 'static {
    /// Validate and persist a message from `sender` to `receiver`.
    ///
    /// Returns the stored record, or [`StoreError::InvalidContent`],
    /// [`StoreError::UnknownReceiver`] or [`StoreError::Persistence`].
    fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> impl Future<Output = Result<StoredMessage, StoreError>> + Send;
}

impl<T: MessageStore> MessageStore for std::sync::Arc<T> {
    fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> impl Future<Output = Result<StoredMessage, StoreError>> + Send {
        (**self).send(sender, receiver, content)
    }
}
