//! Application state
//!
//! Environment-driven configuration and the shared read surface used by
//! presentation layers.

use crate::alert_aggregator::{
    ActiveAlertSnapshot, AlertAggregator, AlertAggregatorConfig, AlertRecord, AlertStatistics,
};
use crate::alert_dispatch::{AlertDispatcher, DispatchStats};
use crate::camera_manager::{CameraManager, DeadCamera, ManagerConfig};
use crate::camera_status::CameraRuntimeState;
use crate::config_store::{AlertPolicy, ConfigStore};
use crate::frame_buffer::{Frame, FrameBuffer};
use crate::overlay::OverlayStyle;
use crate::perception::PerceptionClientConfig;
use crate::stream_worker::WorkerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Pose estimation service URL
    pub perception_url: String,
    pub perception_timeout: Duration,
    pub ffmpeg_path: String,
    pub reconcile_interval: Duration,
    pub probe_timeout: Duration,
    pub join_timeout: Duration,
    pub stale_threshold: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Connecting a source, up to its first frame
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    /// Analyze one frame out of every N
    pub sample_interval: u64,
    /// Defaults for cameras without their own thresholds
    pub warning_after: Duration,
    pub critical_after: Duration,
    pub alert_cooldown: Duration,
    pub history_window: Duration,
    pub history_capacity: usize,
    /// Append alerts to this file when set
    pub alert_log_file: Option<PathBuf>,
    /// POST alerts to this URL when set
    pub alert_webhook_url: Option<String>,
    pub overlay_enabled: bool,
    pub jpeg_quality: u8,
    pub reset_alerts_on_reconnect: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "mysql://root@localhost/posture".to_string(),
            perception_url: "http://localhost:8500".to_string(),
            perception_timeout: Duration::from_millis(5000),
            ffmpeg_path: "ffmpeg".to_string(),
            reconcile_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_millis(3000),
            join_timeout: Duration::from_millis(5000),
            stale_threshold: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(2000),
            open_timeout: Duration::from_millis(10000),
            read_timeout: Duration::from_millis(10000),
            sample_interval: 3,
            warning_after: Duration::from_secs(60),
            critical_after: Duration::from_secs(300),
            alert_cooldown: Duration::from_secs(30),
            history_window: Duration::from_secs(24 * 3600),
            history_capacity: 5000,
            alert_log_file: None,
            alert_webhook_url: None,
            overlay_enabled: true,
            jpeg_quality: 80,
            reset_alerts_on_reconnect: false,
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            database_url: env_or("DATABASE_URL", d.database_url),
            perception_url: env_or("PERCEPTION_URL", d.perception_url),
            perception_timeout: Duration::from_millis(env_or("PERCEPTION_TIMEOUT_MS", 5000)),
            ffmpeg_path: env_or("FFMPEG_PATH", d.ffmpeg_path),
            reconcile_interval: Duration::from_secs(
                env_or("RECONCILE_INTERVAL_SEC", 15u64).max(1),
            ),
            probe_timeout: Duration::from_millis(env_or("PROBE_TIMEOUT_MS", 3000)),
            join_timeout: Duration::from_millis(env_or("JOIN_TIMEOUT_MS", 5000)),
            stale_threshold: Duration::from_secs(env_or("STALE_THRESHOLD_SEC", 30)),
            max_retries: env_or("MAX_RETRIES", d.max_retries).max(1),
            retry_backoff: Duration::from_millis(env_or("RETRY_BACKOFF_MS", 2000)),
            open_timeout: Duration::from_millis(env_or("OPEN_TIMEOUT_MS", 10000)),
            read_timeout: Duration::from_millis(env_or("READ_TIMEOUT_MS", 10000)),
            sample_interval: env_or("SAMPLE_INTERVAL", d.sample_interval).max(1),
            warning_after: Duration::from_secs(env_or("WARNING_AFTER_SEC", 60)),
            critical_after: Duration::from_secs(env_or("CRITICAL_AFTER_SEC", 300)),
            alert_cooldown: Duration::from_secs(env_or("ALERT_COOLDOWN_SEC", 30)),
            history_window: Duration::from_secs(
                env_or("HISTORY_WINDOW_HOURS", 24u64).saturating_mul(3600),
            ),
            history_capacity: env_or("HISTORY_CAPACITY", d.history_capacity).max(1),
            alert_log_file: env_opt("ALERT_LOG_FILE").map(PathBuf::from),
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            overlay_enabled: env_flag("OVERLAY_ENABLED", d.overlay_enabled),
            jpeg_quality: env_or("JPEG_QUALITY", d.jpeg_quality).clamp(1, 100),
            reset_alerts_on_reconnect: env_flag(
                "RESET_ALERTS_ON_RECONNECT",
                d.reset_alerts_on_reconnect,
            ),
        }
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy::new(self.warning_after, self.critical_after, self.alert_cooldown)
    }

    pub fn overlay_style(&self) -> Option<OverlayStyle> {
        self.overlay_enabled.then(|| OverlayStyle {
            jpeg_quality: self.jpeg_quality,
            ..OverlayStyle::default()
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
            open_timeout: self.open_timeout,
            read_timeout: self.read_timeout,
            sample_interval: self.sample_interval,
            reset_alerts_on_reconnect: self.reset_alerts_on_reconnect,
            overlay: self.overlay_style(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconcile_interval: self.reconcile_interval,
            probe_timeout: self.probe_timeout,
            join_timeout: self.join_timeout,
            stale_threshold: self.stale_threshold,
            max_retries: self.max_retries,
            worker: self.worker_config(),
        }
    }

    pub fn aggregator_config(&self) -> AlertAggregatorConfig {
        AlertAggregatorConfig {
            window: self.history_window,
            max_events_per_camera: self.history_capacity,
        }
    }

    pub fn perception_config(&self) -> PerceptionClientConfig {
        PerceptionClientConfig {
            base_url: self.perception_url.clone(),
            timeout: self.perception_timeout,
            ..PerceptionClientConfig::default()
        }
    }
}

/// Application state shared with presentation layers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Cached desired camera set
    pub config_store: Arc<ConfigStore>,
    pub manager: Arc<CameraManager>,
    /// Latest frame per camera
    pub frame_buffer: Arc<FrameBuffer>,
    pub aggregator: Arc<AlertAggregator>,
    pub dispatcher: Option<AlertDispatcher>,
}

impl AppState {
    pub fn latest_frame(&self, camera_id: &str) -> Option<Frame> {
        self.frame_buffer.latest(camera_id)
    }

    pub fn active_alerts(&self, camera_id: &str) -> ActiveAlertSnapshot {
        self.aggregator.active_alerts(camera_id)
    }

    pub fn recent_alerts(&self, camera_id: &str, limit: usize) -> Vec<AlertRecord> {
        self.aggregator.recent(camera_id, limit)
    }

    /// Alert counts over `window` (clamped to the retention window)
    pub fn statistics(&self, camera_id: Option<&str>, window: Duration) -> AlertStatistics {
        self.aggregator.statistics(camera_id, window)
    }

    pub fn camera_states(&self) -> Vec<CameraRuntimeState> {
        self.manager.camera_states()
    }

    pub fn dead_cameras(&self) -> Vec<DeadCamera> {
        self.manager.dead_cameras()
    }

    pub fn dispatch_stats(&self) -> Option<DispatchStats> {
        self.dispatcher.as_ref().map(|d| d.stats())
    }
}
