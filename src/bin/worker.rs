use safety_summary_worker::{
    config::WorkerConfig,
    db::{self, store::PgJobStore},
    services::generation::GeminiClient,
    telemetry,
    worker::QueueWorker,
};
use std::net::SocketAddr;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting safety summary worker");

    // Load configuration; a missing generation credential is fatal
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            process::exit(1);
        }
    };
    let api_key = match config.generation_key() {
        Ok(key) => key.to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Missing generation credential, refusing to start");
            process::exit(1);
        }
    };

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be a socket address");
        telemetry::install_prometheus_exporter(addr)
            .expect("Failed to install Prometheus metrics exporter");
        tracing::info!(%addr, "Prometheus exporter listening");
    }
    telemetry::describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    if config.run_migrations {
        tracing::info!("Running database migrations");
        db::run_migrations(&db_pool)
            .await
            .expect("Failed to run database migrations");
    }

    tracing::info!(model = %config.gemini_model, "Initializing Gemini client");
    let generator = GeminiClient::new(
        &config.gemini_api_base,
        &config.gemini_model,
        &api_key,
        config.generation_timeout(),
    )
    .expect("Failed to initialize Gemini client");

    let worker = QueueWorker::new(PgJobStore::new(db_pool), generator, config.worker_settings());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing current job");
                shutdown.cancel();
            }
        }
    });

    worker.run(shutdown).await;
}
