use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

mod auth;
mod config;
mod db;
mod messages;
mod server;
mod telemetry;
mod users;

pub use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;

    telemetry::init(server_config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Talkify Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    server_config.log_config();

    let db = match &server_config.db_path {
        Some(path) => db::Database::open_local("talkify", path).await,
        None => db::Database::in_memory("talkify").await,
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize database: {}", e))?;
    if db.is_in_memory() {
        warn!("Using in-memory database; all data is lost on exit");
    }

    db::MigrationRunner::default()
        .run(&db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database initialized and migrations complete");

    let state = Arc::new(server::AppState::new(db, server_config));
    server::start(state).await?;

    telemetry::shutdown();

    Ok(())
}
