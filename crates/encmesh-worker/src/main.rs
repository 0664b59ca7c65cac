//! Encode worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use encmesh_media::detect_encoders;
use encmesh_worker::config::load_or_init;
use encmesh_worker::metrics::init_metrics;
use encmesh_worker::{JsonConfigStore, Worker};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("encmesh=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting encmesh-worker");

    let store = JsonConfigStore::from_env();
    let config = match load_or_init(&store) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from {}: {}", store.path().display(), e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        match init_metrics(addr) {
            Ok(()) => info!(%addr, "Metrics exporter listening"),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let codecs = match detect_encoders(&config.ffmpeg_path).await {
        Ok(codecs) => codecs,
        Err(e) => {
            warn!("Encoder discovery failed, advertising no codecs: {}", e);
            Vec::new()
        }
    };
    info!(count = codecs.len(), "Encoders available");

    let worker = match Worker::new(config, Arc::new(store), codecs) {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to create worker: {}", e);
            std::process::exit(1);
        }
    };

    // Setup signal handlers
    let signal_worker = Arc::clone(&worker);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_worker.shutdown().await;
    });

    if let Err(e) = worker.run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
