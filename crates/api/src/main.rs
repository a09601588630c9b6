use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagegen_api::background;
use imagegen_api::config::ServerConfig;
use imagegen_api::router::build_app_router;
use imagegen_api::state::AppState;
use imagegen_db::PgTaskStore;
use imagegen_pipeline::{GenerationService, InMemoryRateLimitStore, QuotaGate, Supervisor};
use imagegen_providers::config::ProvidersConfig;
use imagegen_providers::health::InMemoryHealthStore;
use imagegen_providers::{HealthTracker, Orchestrator, ProviderRegistry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "imagegen_api=debug,imagegen_pipeline=debug,imagegen_providers=debug,tower_http=debug"
            .into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let providers_config = ProvidersConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = imagegen_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    imagegen_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    imagegen_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Providers ---
    let health = Arc::new(HealthTracker::new(
        Arc::new(InMemoryHealthStore::default()),
        providers_config.error_threshold,
    ));
    let registry = ProviderRegistry::from_config(&providers_config, &health)
        .expect("Invalid provider configuration");
    tracing::info!(providers = ?registry.names(), "Provider registry built");
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), Arc::clone(&health)));

    // --- Generation service ---
    let store = Arc::new(PgTaskStore::new(pool));
    let gate = Arc::new(QuotaGate::new(
        Arc::new(InMemoryRateLimitStore::new()),
        store.clone(),
    ));
    let supervisor = Supervisor::new();
    let generation = GenerationService::new(
        store,
        Arc::clone(&orchestrator),
        Arc::clone(&gate),
        supervisor.clone(),
        &config.public_base_url,
    );

    // --- Background jobs ---
    let jobs_cancel = CancellationToken::new();
    let health_handle = tokio::spawn(background::provider_health::run(
        Arc::clone(&orchestrator),
        Duration::from_secs(config.health_check_interval_secs),
        jobs_cancel.clone(),
    ));
    let sweeper_handle = tokio::spawn(background::rate_window_sweeper::run(
        Arc::clone(&gate),
        jobs_cancel.clone(),
    ));
    tracing::info!("Background jobs started (provider health, rate window sweeper)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        generation,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    jobs_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    tracing::info!("Background jobs stopped");

    let in_flight = supervisor.len();
    let drained = supervisor
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if drained {
        tracing::info!(in_flight, "Background generations drained");
    } else {
        tracing::warn!(in_flight, "Background generations cancelled after shutdown timeout");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
