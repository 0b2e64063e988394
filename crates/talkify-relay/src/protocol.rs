//! JSON wire format for chat frames.
//!
//! Inbound frames from clients:
//!
//! ```json
//! {"type": "message", "content": "hi", "receiver_identity": 2}
//! ```
//!
//! Outbound envelopes to clients:
//!
//! ```json
//! {"type": "message", "message": {...}, "timestamp": "2024-01-01T00:00:00Z"}
//! {"type": "error", "error": "invalid message content", "timestamp": "..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{StoredMessage, UserId};

/// Event decoded from a client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    ChatMessage { receiver: UserId, content: String },
}

/// Why a client frame could not be decoded.
///
/// The display text is sent back to the client in an error envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "receiver_id")]
    receiver_identity: Option<i64>,
}

/// Decode a client frame.
///
/// A missing `content` decodes to an empty string and is rejected later by
/// content validation. A missing receiver is a format error.
pub fn decode(payload: &[u8]) -> Result<InboundEvent, DecodeError> {
    let raw: RawInbound = serde_json::from_slice(payload).map_err(|_| DecodeError::Malformed)?;

    match raw.kind.as_str() {
        "message" => {
            let receiver = raw.receiver_identity.ok_or(DecodeError::Malformed)?;
            Ok(InboundEvent::ChatMessage {
                receiver: UserId(receiver),
                content: raw.content.unwrap_or_default(),
            })
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// Envelope queued to a connection's write pump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEnvelope {
    #[serde(rename = "message")]
    Delivered {
        message: StoredMessage,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEnvelope {
    pub fn delivered(message: StoredMessage) -> Self {
        Self::Delivered {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// The delivered message, if this is not an error envelope.
    pub fn message(&self) -> Option<&StoredMessage> {
        match self {
            Self::Delivered { message, .. } => Some(message),
            Self::Error { .. } => None,
        }
    }

    /// The error text, if this is an error envelope.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Delivered { .. } => None,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
