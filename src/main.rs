use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod models;
mod services;
mod storage;

use api::rooms::RoomRegistry;
use config::Config;
use services::{calls::CallsService, jitsi::JitsiService};
use storage::redis::RedisClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub redis: RedisClient,
    pub config: Arc<Config>,
    pub ws_hub: Arc<api::websocket::WsHub>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_calls_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);

    // Initialize database pool
    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url())
        .await?;
    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Initialize Redis
    let redis = RedisClient::new(&config.redis_url()).await?;
    tracing::info!("Connected to Redis");

    // Call-room registry lives for the whole process
    let rooms = Arc::new(RoomRegistry::new());
    let ws_hub = Arc::new(api::websocket::WsHub::new(rooms, redis.clone()));

    // Spawn the authoritative ring-expiry sweeper
    let sweeper = CallsService::new(
        db.clone(),
        redis.clone(),
        JitsiService::new(config.jitsi.clone()),
        config.calls.clone(),
    );
    let sweep_interval = config.calls.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper.expire_stale_ringing().await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!("Marked {} ringing call(s) as missed", expired.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Ring-expiry sweep failed: {}", e),
            }
        }
    });

    // Create app state
    let state = AppState {
        db,
        redis,
        config: Arc::new(config.clone()),
        ws_hub,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::router::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
