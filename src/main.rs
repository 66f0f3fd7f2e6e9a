//! Workflow relay
//!
//! Chat front-end that lets users register workflow definitions, pick one per
//! conversation, and relay each message to an execution backend.

mod api;
mod backend;
mod bot;
mod config;
mod db;
mod error;
mod router;
mod session;
mod workflow;

use api::{create_router, AppState};
use backend::{ExecutionBackend, HttpBackend, LoggingBackend};
use bot::Bot;
use config::RelayConfig;
use db::Database;
use router::MessageRouter;
use session::SessionTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workflow_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = RelayConfig::from_env()?;
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    // Ensure database directory exists
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path)?;

    // Execution backend; validate() guarantees both are present
    let (Some(backend_url), Some(api_key)) = (config.backend_url.as_deref(), config.backend_api_key.clone()) else {
        return Err("backend configuration missing".into());
    };
    let http = HttpBackend::new(backend_url, api_key, config.backend_timeout)?;
    let backend: Arc<dyn ExecutionBackend> = Arc::new(LoggingBackend::new(Arc::new(http)));
    tracing::info!(
        backend = %backend.name(),
        timeout_secs = config.backend_timeout.as_secs(),
        history_policy = ?config.history_policy,
        max_history_turns = config.max_history_turns,
        "Execution backend configured"
    );

    let sessions = Arc::new(SessionTracker::new(db.clone(), config.history_policy));
    let router = MessageRouter::new(
        db.clone(),
        sessions.clone(),
        backend,
        config.backend_timeout,
        config.max_history_turns,
    );
    let bot = Arc::new(Bot::new(db, sessions, router, config.max_upload_bytes));
    let state = AppState::new(bot);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Workflow relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
