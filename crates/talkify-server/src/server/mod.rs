//! HTTP server: application state, router and lifecycle.

pub mod routes;

use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use talkify_relay::{Hub, HubHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::auth::{AuthService, TokenService};
use crate::config::ServerConfig;
use crate::db::Database;
use crate::messages::{MessageRepository, SqlMessageStore};
use crate::users::UserRepository;

/// Shared state for every handler.
pub struct AppState {
    pub db: Database,
    pub users: UserRepository,
    pub messages: MessageRepository,
    pub store: SqlMessageStore,
    pub auth: AuthService,
    pub hub: HubHandle,
    pub config: ServerConfig,
}

impl AppState {
    /// Build repositories and start the relay hub. Must be called inside a
    /// Tokio runtime.
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let users = UserRepository::new(db.clone());
        let messages = MessageRepository::new(db.clone());
        let store = SqlMessageStore::new(users.clone(), messages.clone());
        let auth = AuthService::new(
            users.clone(),
            TokenService::new(&config.jwt_secret, config.jwt_ttl),
        );
        let hub = Hub::new(store.clone(), config.hub_config()).start();

        Self {
            db,
            users,
            messages,
            store,
            auth,
            hub,
            config,
        }
    }
}

/// Serve HTTP until Ctrl-C or SIGTERM, then stop the hub.
pub async fn start(state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(state.config.http_addr).await?;
    let addr = listener.local_addr()?;

    let stop_token = CancellationToken::new();
    let signal_token = stop_token.clone();
    let signal_hub = state.hub.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        // Close live sessions so upgraded sockets don't hold the drain open
        signal_hub.shutdown().await;
        signal_token.cancel();
    });

    let app = create_router(state.clone());
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    state.hub.shutdown().await;
    info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", routes::router())
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Liveness plus database reachability.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let online = state.hub.online_users().await.map(|users| users.len()).ok();

    match state.db.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "talkify-server",
                "version": env!("CARGO_PKG_VERSION"),
                "relay_running": state.hub.is_running(),
                "online_users": online,
            })),
        ),
        Ok(false) => {
            warn!("Health check: database unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "talkify-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": "database unhealthy"
                })),
            )
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "talkify-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": "database error"
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = Arc::new(AppState::new(test_database().await, ServerConfig::test()));
        let app = create_router(state.clone());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "talkify-server");
        assert_eq!(json["relay_running"], true);
        assert_eq!(json["online_users"], 0);

        state.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let state = Arc::new(AppState::new(test_database().await, ServerConfig::test()));
        let app = create_router(state.clone());

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        state.hub.shutdown().await;
    }
}
