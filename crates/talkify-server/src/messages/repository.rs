use chrono::{DateTime, SubsecRound, Utc};
use libsql::Row;
use talkify_relay::{StoredMessage, UserId};
use tracing::{debug, instrument};

use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::users::{user_from_row, User, UserSummary};

use super::{MessageError, MessageWithUsers};

/// libSQL-backed message storage.
#[derive(Clone)]
pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message. Content and receiver are expected to be checked
    /// already; see [`SqlMessageStore`](super::SqlMessageStore).
    #[instrument(skip_all, fields(sender = %sender, receiver = %receiver))]
    pub async fn create(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<StoredMessage, MessageError> {
        // Stored text keeps microseconds; return the same instant.
        let now = Utc::now().trunc_subsecs(6);
        let stamp = format_timestamp(now);
        let conn = self.db.connection().await?;

        conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            (sender.as_i64(), receiver.as_i64(), content, stamp.as_str()),
        )
        .await
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        debug!(message_id = id, "Message stored");

        Ok(StoredMessage {
            id,
            sender_identity: sender,
            receiver_identity: receiver,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Messages between `a` and `b` in either direction, newest first.
    pub async fn conversation_history(
        &self,
        a: UserId,
        b: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageWithUsers>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT m.id, m.content, m.created_at,
                       m.sender_id, s.username,
                       m.receiver_id, r.username
                FROM messages m
                JOIN users s ON s.id = m.sender_id
                JOIN users r ON r.id = m.receiver_id
                WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                   OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT ?3 OFFSET ?4
                "#,
                (a.as_i64(), b.as_i64(), limit, offset),
            )
            .await
            .map_err(db_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let created_at: String = row.get(2).map_err(db_err)?;
            messages.push(MessageWithUsers {
                id: row.get(0).map_err(db_err)?,
                content: row.get(1).map_err(db_err)?,
                created_at: parse_timestamp(&created_at)?,
                sender: UserSummary {
                    id: UserId(row.get::<i64>(3).map_err(db_err)?),
                    username: row.get(4).map_err(db_err)?,
                },
                receiver: UserSummary {
                    id: UserId(row.get::<i64>(5).map_err(db_err)?),
                    username: row.get(6).map_err(db_err)?,
                },
            });
        }
        Ok(messages)
    }

    pub async fn count_conversation(&self, a: UserId, b: UserId) -> Result<i64, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT COUNT(*) FROM messages
                WHERE (sender_id = ?1 AND receiver_id = ?2)
                   OR (sender_id = ?2 AND receiver_id = ?1)
                "#,
                (a.as_i64(), b.as_i64()),
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err),
            None => Ok(0),
        }
    }

    /// Users `user` has exchanged messages with, most recent conversation first.
    pub async fn recent_conversations(
        &self,
        user: UserId,
        limit: i64,
    ) -> Result<Vec<User>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT u.id, u.username, u.password_hash, u.created_at
                FROM users u
                JOIN (
                    SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner_id,
                           MAX(created_at) AS last_at
                    FROM messages
                    WHERE sender_id = ?1 OR receiver_id = ?1
                    GROUP BY partner_id
                ) c ON c.partner_id = u.id
                ORDER BY c.last_at DESC
                LIMIT ?2
                "#,
                (user.as_i64(), limit),
            )
            .await
            .map_err(db_err)?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            users.push(user_from_row(&row)?);
        }
        Ok(users)
    }

    /// Every message involving `user` stored after `since`, oldest first.
    pub async fn messages_since(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, sender_id, receiver_id, content, created_at
                FROM messages
                WHERE (sender_id = ?1 OR receiver_id = ?1) AND created_at > ?2
                ORDER BY created_at ASC, id ASC
                "#,
                (user.as_i64(), format_timestamp(since)),
            )
            .await
            .map_err(db_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            messages.push(stored_from_row(&row)?);
        }
        Ok(messages)
    }
}

fn stored_from_row(row: &Row) -> Result<StoredMessage, MessageError> {
    let created_at: String = row.get(4).map_err(db_err)?;
    Ok(StoredMessage {
        id: row.get(0).map_err(db_err)?,
        sender_identity: UserId(row.get::<i64>(1).map_err(db_err)?),
        receiver_identity: UserId(row.get::<i64>(2).map_err(db_err)?),
        content: row.get(3).map_err(db_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn db_err<E: std::fmt::Display>(e: E) -> MessageError {
    MessageError::Database(e.to_string())
}
