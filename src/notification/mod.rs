//! Notification - Alert delivery sinks
//!
//! ## Responsibilities
//!
//! - `Notifier` seam invoked once per non-suppressed AlertEvent
//! - Log, append-only file and JSON webhook sinks
//!
//! Sinks do not throttle; the cooldown lives in the state machine.

use crate::alert_state::{AlertEvent, AlertLevel};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Delivery sink for alert events
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &AlertEvent) -> Result<()>;
}

/// Emits alerts through tracing
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        match event.level {
            AlertLevel::Critical => tracing::error!(
                camera_id = %event.camera_id,
                metric = %event.metric,
                value = event.value,
                duration_secs = event.abnormal_duration.as_secs(),
                "Posture alert CRITICAL"
            ),
            _ => tracing::warn!(
                camera_id = %event.camera_id,
                metric = %event.metric,
                value = event.value,
                duration_secs = event.abnormal_duration.as_secs(),
                "Posture alert WARNING"
            ),
        }
        Ok(())
    }
}

/// Appends `[timestamp] LEVEL: message` lines to a file
pub struct FileNotifier {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(event: &AlertEvent) -> String {
        format!(
            "[{}] {}: {}\n",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.level.as_str().to_uppercase(),
            event.message()
        )
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    fn name(&self) -> &str {
        "file"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        let line = Self::format_line(event);
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    message: String,
    #[serde(flatten)]
    event: &'a AlertEvent,
}

/// POSTs each alert as JSON
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        let payload = WebhookPayload {
            message: event.message(),
            event,
        };
        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "webhook returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
