use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;

use crate::messages::clamp_limit;
use crate::server::AppState;
use crate::users::User;

use super::{user_error_to_response, ApiError, AuthUser, PageQuery};

const DEFAULT_USER_PAGE: i64 = 50;

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: i64,
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AuthUser(_caller): AuthUser,
    query: Option<Query<PageQuery>>,
) -> Result<Json<UserListResponse>, ApiError> {
    let Query(page) = query.unwrap_or_default();
    let limit = clamp_limit(page.limit, DEFAULT_USER_PAGE);

    let users = state
        .users
        .list(limit, page.offset())
        .await
        .map_err(user_error_to_response)?;
    let total = state.users.count().await.map_err(user_error_to_response)?;

    Ok(Json(UserListResponse { users, total }))
}
