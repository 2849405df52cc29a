use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shop_guardian::app_state::AppState;
use shop_guardian::config::AppConfig;
use shop_guardian::db;
use shop_guardian::routes;
use shop_guardian::services::{
    persistence::PgPersistence, process::ProcessRegistry, queue::RedisJobQueue,
    recording::RecordingService,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing shop-guardian server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis job queue");
    let queue = RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let recorder_bin = config.recorder_path();
    tracing::info!(recorder_bin = %recorder_bin.display(), "Recorder subprocesses will be supervised");
    let registry = Arc::new(ProcessRegistry::new(
        config.process_validation_window(),
        config.process_stop_timeout(),
    ));
    let recordings = RecordingService::new(
        Arc::clone(&registry),
        Arc::new(PgPersistence::new(db_pool.clone())),
        recorder_bin,
    );

    let state = AppState::new(db_pool, queue, recordings);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/shops/{shop_id}/recordings",
            post(routes::recording::start_recording).get(routes::recording::list_recordings),
        )
        .route(
            "/api/v1/shops/{shop_id}/recordings/{camera_name}",
            delete(routes::recording::stop_recording),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Recorders run in their own process groups and would outlive the server.
    tracing::info!("Stopping active recorders");
    registry.stop_all().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
