use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_types::SdkConfig;
use labeler_service::config::{AwsConfig, Config};
use labeler_service::{
    FirestoreStore, Pipeline, PipelineSettings, RekognitionExtractor, S3Fetcher, SqsMessageSource,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting labeler service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let aws_config = load_aws_config(&config.aws).await;

    let store = Arc::new(
        FirestoreStore::new(&config.firestore)
            .context("Failed to initialize Firestore document store")?,
    );
    let source = Arc::new(SqsMessageSource::new(&aws_config, config.queue.url.clone()));
    let fetcher = Arc::new(S3Fetcher::new(&aws_config, config.aws.force_path_style));
    let extractor = Arc::new(RekognitionExtractor::new(&aws_config));

    let pipeline = Pipeline::new(
        source,
        fetcher,
        extractor,
        store,
        PipelineSettings::from_config(&config),
    );

    let shutdown = CancellationToken::new();

    // Spawn pipeline loop
    let pipeline_shutdown = shutdown.clone();
    let pipeline_handle = tokio::spawn(async move { pipeline.run(pipeline_shutdown).await });

    info!("Labeler service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down labeler service, finishing in-flight message");

    shutdown.cancel();
    pipeline_handle.await.context("Pipeline task failed")?;

    info!("Labeler service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Shared AWS configuration for the SQS, S3 and Rekognition clients
async fn load_aws_config(config: &AwsConfig) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

    // Custom endpoint for LocalStack
    if let Some(ref endpoint_url) = config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    let aws_config = loader.load().await;

    info!(region = %config.region, "AWS configuration loaded");

    aws_config
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
