//! SpliceD — the Splice joiner daemon.
//!
//! Usage:
//!   spliced --config path/to/spliced.toml
//!
//! The daemon subscribes to the join request topic, claims requests in the
//! store, provisions AD computer accounts and writes sealed results back.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use spliced::config::JoinerConfig;
use spliced::error::Result;
use spliced::events::{LogRecorder, Recorder, EVT_CONFIG};
use spliced::provision::DjoinProvisioner;
use spliced::worker::Worker;
use splice_queue::NatsQueue;
use splice_store::PgStore;

/// Splice joiner daemon.
#[derive(Parser, Debug)]
#[command(name = "spliced")]
#[command(about = "Processes Splice domain join requests")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SPLICED_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await.map_err(|e| e.into())
}

async fn run(cli: Cli) -> Result<()> {
    let config = JoinerConfig::load(&cli.config)?;
    let recorder = Arc::new(LogRecorder);
    recorder.info(
        EVT_CONFIG,
        &format!(
            "configured: domain={} instance={} topic={} encrypt_blob={} verify_certs={} permit_reuse={}",
            config.domain,
            config.instance,
            config.topic,
            config.encrypt_blob,
            config.verify_certs,
            config.permit_reuse
        ),
    );

    let store = PgStore::connect(&config.database_url)
        .await
        .map_err(|e| spliced::JoinerError::Store(e.to_string()))?;
    let queue = NatsQueue::connect(&config.nats_url, config.topic.clone())
        .await
        .map_err(|e| spliced::JoinerError::Queue(e.to_string()))?;

    let metrics_addr = config.metrics_addr;
    let worker = Worker::new(
        config,
        Arc::new(store),
        Arc::new(queue),
        Arc::new(DjoinProvisioner),
        recorder,
    )?;

    if let Some(addr) = metrics_addr {
        serve_metrics(addr, worker.metrics()).await?;
    }

    worker.run().await;
    Ok(())
}

/// Exposes `/metrics` and `/healthz` for scraping, off the worker's path.
async fn serve_metrics(
    addr: std::net::SocketAddr,
    metrics: Arc<spliced::metrics::Metrics>,
) -> Result<()> {
    use axum::routing::get;

    let app = axum::Router::new()
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
        .route("/healthz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| spliced::JoinerError::Config(format!("metrics listener: {e}")))?;
    tracing::info!(addr = %addr, "Serving metrics");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(())
}
