//! Posture Camserver
//!
//! Main entry point: wires the camera pipeline and runs it until Ctrl-C.

use posture_camserver::{
    alert_aggregator::AlertAggregator,
    alert_dispatch::AlertDispatcher,
    camera_manager::CameraManager,
    config_store::{ConfigStore, Datastore, MySqlDatastore},
    frame_buffer::FrameBuffer,
    frame_source::FfmpegConnector,
    notification::{FileNotifier, LogNotifier, Notifier, WebhookNotifier},
    perception::HttpPerceptionClient,
    state::{AppConfig, AppState},
    stream_worker::WorkerContext,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posture_camserver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Posture Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        perception_url = %config.perception_url,
        ffmpeg_path = %config.ffmpeg_path,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        sample_interval = config.sample_interval,
        overlay_enabled = config.overlay_enabled,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    let datastore: Arc<dyn Datastore> =
        Arc::new(MySqlDatastore::new(pool.clone(), config.alert_policy()));
    let config_store = Arc::new(ConfigStore::new(datastore.clone()));
    match config_store.refresh_cache().await {
        Ok(count) => tracing::info!(cameras = count, "ConfigStore initialized"),
        Err(e) => tracing::warn!(error = %e, "Initial camera load failed, will retry"),
    }

    // Alert delivery
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Some(path) = &config.alert_log_file {
        notifiers.push(Arc::new(FileNotifier::new(path.clone())));
        tracing::info!(path = %path.display(), "File notifier enabled");
    }
    if let Some(url) = &config.alert_webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(5),
        )?));
        tracing::info!(url = %url, "Webhook notifier enabled");
    }
    let (dispatcher, dispatch_task) = AlertDispatcher::spawn(Some(datastore), notifiers);
    tracing::info!("AlertDispatcher started");

    let perception = Arc::new(HttpPerceptionClient::new(config.perception_config())?);
    if !perception.health_check().await {
        tracing::warn!(url = %config.perception_url, "Perception service not reachable yet");
    }

    let frame_buffer = Arc::new(FrameBuffer::new());
    let aggregator = Arc::new(AlertAggregator::new(config.aggregator_config()));

    let ctx = WorkerContext {
        connector: Arc::new(FfmpegConnector::new(
            config.ffmpeg_path.clone(),
            config.open_timeout,
        )),
        perception,
        frame_buffer: frame_buffer.clone(),
        aggregator: aggregator.clone(),
        dispatcher: Some(dispatcher.clone()),
    };
    let manager = Arc::new(CameraManager::new(config.manager_config(), ctx));

    let state = AppState {
        config,
        config_store: config_store.clone(),
        manager: manager.clone(),
        frame_buffer,
        aggregator,
        dispatcher: Some(dispatcher),
    };

    // Start reconciliation + health loop
    let manager_task = {
        let manager = manager.clone();
        let config_store = config_store.clone();
        tokio::spawn(async move { manager.run(&config_store).await })
    };
    tracing::info!("CameraManager started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    manager.shutdown().await;
    if let Err(e) = manager_task.await {
        tracing::error!(error = %e, "Camera manager task failed");
    }

    if let Some(stats) = state.dispatch_stats() {
        tracing::info!(
            received = stats.received,
            dropped = stats.dropped,
            persisted = stats.persisted,
            notified = stats.notified,
            "Alert dispatch summary"
        );
    }

    // Dispatcher drains once every handle is gone
    drop(state);
    drop(manager);
    if let Err(e) = dispatch_task.await {
        tracing::error!(error = %e, "Alert dispatcher task failed");
    }

    tracing::info!("Posture Camserver stopped");
    Ok(())
}
