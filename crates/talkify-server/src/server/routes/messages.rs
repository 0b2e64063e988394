//! Message sending and history.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use talkify_relay::{HubHandle, MessageStore, RelayError, StoredMessage, UserId};
use tracing::{debug, warn};

use crate::messages::{clamp_limit, MessageResponse, MessageWithUsers, DEFAULT_HISTORY_LIMIT};
use crate::server::AppState;
use crate::users::{User, UserSummary};

use super::auth::bad_json;
use super::{
    api_error, message_error_to_response, store_error_to_response, user_error_to_response,
    ApiError, AuthUser, PageQuery,
};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: UserId,
    pub content: String,
}

/// POST /api/v1/messages
///
/// Persists the message, then pushes it to whichever parties are online.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;

    let message = state
        .store
        .send(caller.id, req.receiver_id, &req.content)
        .await
        .map_err(store_error_to_response)?;

    // The message is stored; live delivery is best effort from here.
    match push_to_parties(&state.hub, &message).await {
        Ok(delivered) => debug!(message_id = message.id, delivered, "Message sent over REST"),
        Err(e) => warn!(
            message_id = message.id,
            error = %e,
            "Message stored but live delivery failed"
        ),
    }

    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

/// Push a stored message to the receiver and, if different, the sender.
/// Returns whether the receiver was online.
async fn push_to_parties(hub: &HubHandle, message: &StoredMessage) -> Result<bool, RelayError> {
    let delivered = hub.broadcast(message.receiver_identity, message.clone()).await?;
    if message.sender_identity != message.receiver_identity {
        hub.broadcast(message.sender_identity, message.clone()).await?;
    }
    Ok(delivered)
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
    pub total: usize,
}

/// GET /api/v1/messages?since=<RFC 3339>
pub async fn messages_since(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    query: Option<Query<SinceQuery>>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let Some(Query(query)) = query else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "since must be an RFC 3339 timestamp",
        ));
    };

    let messages: Vec<MessageResponse> = state
        .messages
        .messages_since(caller.id, query.since)
        .await
        .map_err(message_error_to_response)?
        .into_iter()
        .map(MessageResponse::from)
        .collect();

    Ok(Json(MessageListResponse {
        total: messages.len(),
        messages,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<MessageWithUsers>,
    pub total: i64,
    pub participant: UserSummary,
}

/// GET /api/v1/messages/:user_id
pub async fn conversation_history(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    path: Result<Path<i64>, axum::extract::rejection::PathRejection>,
    query: Option<Query<PageQuery>>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Ok(Path(participant_id)) = path else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "invalid user id",
        ));
    };
    let participant_id = UserId(participant_id);
    let Query(page) = query.unwrap_or_default();
    let limit = clamp_limit(page.limit, DEFAULT_HISTORY_LIMIT);

    let participant = state
        .users
        .get_by_id(participant_id)
        .await
        .map_err(user_error_to_response)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "participant_not_found",
                "participant not found",
            )
        })?;

    let messages = state
        .messages
        .conversation_history(caller.id, participant_id, limit, page.offset())
        .await
        .map_err(message_error_to_response)?;
    let total = state
        .messages
        .count_conversation(caller.id, participant_id)
        .await
        .map_err(message_error_to_response)?;

    Ok(Json(ConversationResponse {
        messages,
        total,
        participant: UserSummary::from(&participant),
    }))
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub users: Vec<User>,
    pub total: usize,
}

/// GET /api/v1/conversations
pub async fn recent_conversations(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    query: Option<Query<PageQuery>>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let Query(page) = query.unwrap_or_default();
    let limit = clamp_limit(page.limit, DEFAULT_HISTORY_LIMIT);

    let users = state
        .messages
        .recent_conversations(caller.id, limit)
        .await
        .map_err(message_error_to_response)?;

    Ok(Json(ConversationListResponse {
        total: users.len(),
        users,
    }))
}
