//! Authentication module.
//!
//! - Argon2id password hashing (unique random salt per user)
//! - HS256 access tokens carrying the user id and username
//! - Registration and login on top of [`UserRepository`]

mod jwt;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::users::{validate_password, validate_username, User, UserError, UserRepository};

pub use jwt::TokenService;

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Missing authorization token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error(transparent)]
    User(#[from] UserError),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::CryptoError(err.to_string())
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::CryptoError(format!("Failed to hash password: {}", e)))
}

/// Returns `Ok(false)` on a mismatch and an error only for an unreadable hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AuthError::CryptoError(format!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// A user together with a freshly issued token.
#[derive(Debug, Serialize)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(users: UserRepository, tokens: TokenService) -> Self {
        Self { users, tokens }
    }

    /// Create an account. Does not log the user in.
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        validate_username(username)?;
        validate_password(password)?;

        let hash = hash_password(password)?;
        let user = self.users.create(username, &hash).await?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a token.
    ///
    /// Unknown usernames and wrong passwords both yield
    /// [`AuthError::InvalidCredentials`].
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = match self.users.get_by_username(username).await? {
            Some(user) => user,
            None => {
                debug!("Login for unknown username");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_password(password, &user.password_hash)? {
            debug!(user_id = %user.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.tokens.issue(user.id, &user.username)?;
        Ok(AuthSession { user, token })
    }

    /// Validate a token and make sure its user still exists.
    pub async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.tokens.validate(token)?;
        self.users
            .get_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::InvalidToken("user no longer exists".to_string()))
    }
}
