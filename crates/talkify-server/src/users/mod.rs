//! User accounts.
//!
//! Usernames are 3 to 50 characters of ASCII letters, digits, `_` and `-`.
//! Passwords are 6 to 100 characters and only ever stored as Argon2id hashes.

mod repository;

use chrono::{DateTime, Utc};
use serde::Serialize;
use talkify_relay::UserId;
use thiserror::Error;

use crate::db::DatabaseError;

pub(crate) use repository::user_from_row;
pub use repository::UserRepository;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DatabaseError> for UserError {
    fn from(err: DatabaseError) -> Self {
        UserError::Database(err.to_string())
    }
}

/// A stored user account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user, as embedded in other responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

pub fn validate_username(username: &str) -> Result<(), UserError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN || len > MAX_USERNAME_LEN {
        return Err(UserError::InvalidUsername(format!(
            "must be between {} and {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(UserError::InvalidUsername(
            "may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), UserError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN || len > MAX_PASSWORD_LEN {
        return Err(UserError::InvalidPassword(format!(
            "must be between {} and {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}
