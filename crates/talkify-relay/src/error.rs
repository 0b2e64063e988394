//! Error types for the relay.

use thiserror::Error;

/// Errors surfaced by hub operations.
///
/// Queue state is reported through [`EnqueueResult`](crate::EnqueueResult) and
/// transport failures end the pumps, so the only hub-level failure is a
/// stopped control loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("hub is not running")]
    HubStopped,
}

/// Errors returned by a [`MessageStore`](crate::MessageStore).
///
/// The first two variants are validation failures and are shown to the sender
/// verbatim. Persistence failures carry internal detail for logging only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid message content")]
    InvalidContent,

    #[error("receiver not found")]
    UnknownReceiver,

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl StoreError {
    /// Create a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Text safe to put in an error envelope for the sender.
    pub fn client_message(&self) -> String {
        match self {
            Self::Persistence(_) => "failed to send message".to_string(),
            other => other.to_string(),
        }
    }

    /// Short label used as a metrics attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidContent => "invalid_content",
            Self::UnknownReceiver => "unknown_receiver",
            Self::Persistence(_) => "persistence",
        }
    }
}
