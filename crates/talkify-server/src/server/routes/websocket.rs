//! Chat WebSocket endpoint and presence listing.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Json,
};
use futures::{future, SinkExt, StreamExt};
use serde::Serialize;
use talkify_relay::{Frame, HubHandle, UserId};
use tracing::{info, warn};

use crate::server::AppState;

use super::{relay_error_to_response, ApiError, AuthUser};

/// GET /api/v1/ws/chat
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    info!(user_id = %user.id, username = %user.username, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, hub, user.id))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle, user: UserId) {
    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(message_to_frame));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(frame_to_message(frame))));

    match talkify_relay::serve(hub, user, stream, sink).await {
        Ok(()) => info!(user_id = %user, "WebSocket session ended"),
        Err(e) => warn!(user_id = %user, error = %e, "WebSocket session failed"),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })),
    }
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub online_users: Vec<UserId>,
    pub total: usize,
}

/// GET /api/v1/online-users
pub async fn online_users(
    State(state): State<Arc<AppState>>,
    AuthUser(_caller): AuthUser,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let online_users = state
        .hub
        .online_users()
        .await
        .map_err(relay_error_to_response)?;

    Ok(Json(OnlineUsersResponse {
        total: online_users.len(),
        online_users,
    }))
}
