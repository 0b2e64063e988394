use chrono::Utc;
use libsql::Row;
use talkify_relay::UserId;
use tracing::{debug, instrument};

use crate::db::{format_timestamp, parse_timestamp, Database};

use super::{User, UserError};

const USER_COLUMNS: &str = "id, username, password_hash, created_at";

/// libSQL-backed user storage.
#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new user. `password_hash` must already be hashed.
    #[instrument(skip(self, password_hash))]
    pub async fn create(&self, username: &str, password_hash: &str) -> Result<User, UserError> {
        if self.exists(username).await? {
            return Err(UserError::UsernameTaken(username.to_string()));
        }

        let now = Utc::now();
        let stamp = format_timestamp(now);
        let conn = self.db.connection().await?;

        conn.execute(
            "INSERT INTO users (username, password_hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            (username, password_hash, stamp.as_str()),
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                UserError::UsernameTaken(username.to_string())
            } else {
                db_err(e)
            }
        })?;

        let id = conn.last_insert_rowid();
        debug!(user_id = id, "User created");

        Ok(User {
            id: UserId(id),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
        })
    }

    pub async fn get_by_id(&self, id: UserId) -> Result<Option<User>, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id.as_i64()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, username: &str) -> Result<bool, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query("SELECT 1 FROM users WHERE username = ?1", [username])
            .await
            .map_err(db_err)?;

        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    /// Page through users ordered by username.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM users ORDER BY username ASC LIMIT ?1 OFFSET ?2",
                    USER_COLUMNS
                ),
                (limit, offset),
            )
            .await
            .map_err(db_err)?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            users.push(user_from_row(&row)?);
        }
        Ok(users)
    }

    pub async fn count(&self) -> Result<i64, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM users", ())
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err),
            None => Ok(0),
        }
    }
}

/// Build a [`User`] from a row selected with `USER_COLUMNS`.
pub(crate) fn user_from_row(row: &Row) -> Result<User, UserError> {
    let created_at: String = row.get(3).map_err(db_err)?;
    Ok(User {
        id: UserId(row.get::<i64>(0).map_err(db_err)?),
        username: row.get(1).map_err(db_err)?,
        password_hash: row.get(2).map_err(db_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn db_err<E: std::fmt::Display>(e: E) -> UserError {
    UserError::Database(e.to_string())
}
