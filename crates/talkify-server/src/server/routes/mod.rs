//! REST and WebSocket routes under `/api/v1`.
//!
//! Every route except registration and login requires a token, sent as
//! `Authorization: Bearer <token>` or as a `?token=` query parameter.

pub mod auth;
pub mod messages;
pub mod users;
pub mod websocket;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use talkify_relay::{RelayError, StoreError};
use tracing::error;

use crate::auth::AuthError;
use crate::messages::MessageError;
use crate::users::{User, UserError};

use super::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users", get(users::list_users))
        .route(
            "/messages",
            post(messages::send_message).get(messages::messages_since),
        )
        .route("/messages/:user_id", get(messages::conversation_history))
        .route("/conversations", get(messages::recent_conversations))
        .route("/online-users", get(websocket::online_users))
        .route("/ws/chat", get(websocket::chat_handler))
}

/// Error body shared by all routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: &str, message: &str) -> ApiError {
    (status, Json(ErrorResponse::new(error, message)))
}

fn internal_error(context: &str, err: &dyn std::fmt::Display) -> ApiError {
    error!(error = %err, "{}", context);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}

pub fn auth_error_to_response(err: AuthError) -> ApiError {
    match err {
        AuthError::InvalidCredentials => api_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid credentials",
        ),
        AuthError::MissingToken => api_error(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "authorization token required",
        ),
        AuthError::InvalidToken(_) => {
            api_error(StatusCode::UNAUTHORIZED, "invalid_token", "invalid token")
        }
        AuthError::TokenExpired => {
            api_error(StatusCode::UNAUTHORIZED, "token_expired", "token expired")
        }
        AuthError::CryptoError(_) => internal_error("Authentication failed", &err),
        AuthError::User(err) => user_error_to_response(err),
    }
}

pub fn user_error_to_response(err: UserError) -> ApiError {
    match &err {
        UserError::InvalidUsername(_) => {
            api_error(StatusCode::BAD_REQUEST, "invalid_username", &err.to_string())
        }
        UserError::InvalidPassword(_) => {
            api_error(StatusCode::BAD_REQUEST, "invalid_password", &err.to_string())
        }
        UserError::UsernameTaken(_) => {
            api_error(StatusCode::CONFLICT, "user_exists", "user already exists")
        }
        UserError::Database(_) => internal_error("User query failed", &err),
    }
}

pub fn message_error_to_response(err: MessageError) -> ApiError {
    match &err {
        MessageError::Database(_) => internal_error("Message query failed", &err),
    }
}

pub fn store_error_to_response(err: StoreError) -> ApiError {
    match &err {
        StoreError::InvalidContent => {
            api_error(StatusCode::BAD_REQUEST, "invalid_content", &err.client_message())
        }
        StoreError::UnknownReceiver => api_error(
            StatusCode::NOT_FOUND,
            "receiver_not_found",
            &err.client_message(),
        ),
        StoreError::Persistence(_) => {
            error!(error = %err, "Failed to persist message");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "send_failed",
                &err.client_message(),
            )
        }
    }
}

pub fn relay_error_to_response(err: RelayError) -> ApiError {
    error!(error = %err, "Relay unavailable");
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "relay_unavailable",
        "chat relay is not running",
    )
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()?
        .0
        .token
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| query_token(parts))
            .ok_or_else(|| auth_error_to_response(AuthError::MissingToken))?;

        let user = state
            .auth
            .authenticate(&token)
            .await
            .map_err(auth_error_to_response)?;

        Ok(AuthUser(user))
    }
}

/// Shared `limit`/`offset` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn offset(&self) -> i64 {
        self.offset.filter(|o| *o >= 0).unwrap_or(0)
    }
}
