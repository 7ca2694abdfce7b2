use std::process::ExitCode;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use splice_broker::validators::gce::GceChecker;
use splice_broker::{router, AppState, BrokerConfig};
use splice_queue::NatsQueue;
use splice_store::PgStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = BrokerConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "Starting Splice broker");

    let store = PgStore::connect(&config.database_url).await?;
    tracing::info!("Connected to PostgreSQL");

    let nats = async_nats::connect(&config.nats_url).await?;
    tracing::info!(url = %config.nats_url, "Connected to NATS");
    let queue = NatsQueue::new(nats, config.pubsub_topic.clone());

    let gce = GceChecker::new(config.project_allowlist.clone(), config.expected_audience());

    let state = AppState {
        config: config.clone(),
        store: Arc::new(store),
        queue: Arc::new(queue),
        gce: Arc::new(gce),
        generator_names: splice_generators::builtin_names(),
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received shutdown signal");
}
