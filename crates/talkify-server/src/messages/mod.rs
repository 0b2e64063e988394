//! Direct message storage and history queries.

mod repository;
mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
use talkify_relay::{StoredMessage, UserId};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::users::{UserError, UserSummary};

pub use repository::MessageRepository;
pub use store::SqlMessageStore;

/// Default page size for conversation history.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Largest page any history or listing query returns.
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<DatabaseError> for MessageError {
    fn from(err: DatabaseError) -> Self {
        MessageError::Database(err.to_string())
    }
}

impl From<UserError> for MessageError {
    fn from(err: UserError) -> Self {
        MessageError::Database(err.to_string())
    }
}

/// A history entry with both parties resolved.
#[derive(Debug, Clone, Serialize)]
pub struct MessageWithUsers {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
    pub receiver: UserSummary,
}

/// REST view of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for MessageResponse {
    fn from(message: StoredMessage) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_identity,
            receiver_id: message.receiver_identity,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// Clamp a client-supplied page size into `1..=MAX_PAGE_LIMIT`.
pub fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    match limit {
        Some(limit) if limit > 0 => limit.min(MAX_PAGE_LIMIT),
        _ => default,
    }
}
