use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use event_receiver::accumulator::BatchAccumulator;
use event_receiver::api::{start_server, AppState};
use event_receiver::config::AppConfig;
use event_receiver::contracts::{Flusher, ObjectStore};
use event_receiver::flusher::{FlushScheduler, SchedulerConfig};
use event_receiver::metrics::IngestMetrics;
use event_receiver::storage::{ObjectStoreUploader, RetryConfig, S3ObjectStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("event_receiver=info".parse()?),
        )
        .init();

    tracing::info!("Event receiver starting...");

    let config = AppConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    tracing::info!(
        tiers = ?config.allowed_customer_tiers,
        max_batch_size_bytes = config.batch.max_batch_size_bytes,
        max_batch_delay_secs = config.batch.max_batch_delay.as_secs(),
        "Loaded configuration"
    );

    let store = S3ObjectStore::connect(&config.s3).await;
    if let Err(e) = store.head_bucket().await {
        tracing::error!(bucket = %config.s3.bucket_name, error = %e, "Bucket is not accessible");
        return Err(e.into());
    }
    tracing::info!(bucket = %store.bucket(), "Verified S3 bucket");

    let metrics = Arc::new(IngestMetrics::new());
    let uploader = Arc::new(ObjectStoreUploader::new(
        store,
        RetryConfig::default(),
        Arc::clone(&metrics),
    ));
    let accumulator = Arc::new(BatchAccumulator::new(
        uploader,
        &config.batch,
        Arc::clone(&metrics),
    ));

    let scheduler = FlushScheduler::new(
        Arc::clone(&accumulator),
        SchedulerConfig::from(&config.batch),
    );
    scheduler.start().await?;

    let state = Arc::new(AppState::new(
        accumulator,
        config.allowed_customer_tiers.clone(),
        metrics,
    ));

    start_server(config.server.clone(), state, shutdown_signal()).await?;

    tracing::info!("HTTP server stopped, draining buffers");
    let result = scheduler.stop().await?;
    if !result.completed {
        tracing::warn!("Shutdown finished with uploads still in flight");
    }

    tracing::info!("Event receiver stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
