use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardvault::api::middleware::session::{create_session_layer, AppState};
use cardvault::config::Config;
use cardvault::db::{self, BankStore, PgStore};
use cardvault::jobs::expiry_sweeper;
use cardvault::services::{BlockRequestWorkflow, CardNumberCodec, CardRegistry, TransferEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cardvault server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create session layer
    let session_secret = config.session_secret.expose_secret().as_bytes();
    let session_layer = create_session_layer(pool.clone(), session_secret).await?;
    tracing::info!("Session layer initialized");

    // Services
    let store: Arc<dyn BankStore> = Arc::new(PgStore::new(pool.clone(), config.lock_timeout_ms));
    let codec = CardNumberCodec::from_secret(config.card_encryption_key.expose_secret());
    let registry = CardRegistry::new(Arc::clone(&store), codec, config.default_opening_balance);

    // Background jobs
    let _scheduler = expiry_sweeper::start(Arc::clone(&store), &config.expiry_sweep_schedule).await?;

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        block_requests: BlockRequestWorkflow::new(registry.clone()),
        transfers: TransferEngine::new(registry.clone()),
        registry,
    };

    // Build router
    let app = cardvault::api::router()
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
