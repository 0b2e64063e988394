//! Registration and login.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::auth::AuthSession;
use crate::server::AppState;

use super::{api_error, auth_error_to_response, ApiError};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub(super) fn bad_json(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "invalid_request", &rejection.body_text())
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;

    let user = state
        .auth
        .register(&req.username, &req.password)
        .await
        .map_err(auth_error_to_response)?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<AuthSession>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;

    let session = state
        .auth
        .login(&req.username, &req.password)
        .await
        .map_err(auth_error_to_response)?;

    Ok(Json(session))
}
