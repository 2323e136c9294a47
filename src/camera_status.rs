//! Camera runtime status
//!
//! Lifecycle status and progress counters of one running camera. Written by
//! the camera's own stream worker and by the manager's health check; only
//! transitions are logged.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Stopped,
    Connecting,
    Streaming,
    Reconnecting,
    Dead,
}

impl CameraStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CameraStatus::Stopped | CameraStatus::Dead)
    }
}

/// Connection transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Streaming -> Reconnecting/Dead
    Lost,
    /// Reconnecting -> Streaming
    Recovered,
}

/// Point-in-time view of a camera's runtime state
#[derive(Debug, Clone, Serialize)]
pub struct CameraRuntimeState {
    pub camera_id: String,
    pub status: CameraStatus,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub last_update: Option<Instant>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub frames_read: u64,
    pub frames_analyzed: u64,
    pub started_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Shared handle between a worker and the manager
#[derive(Debug)]
pub struct RuntimeHandle {
    state: Mutex<CameraRuntimeState>,
    created: Instant,
    stop: AtomicBool,
    stop_notify: Notify,
}

impl RuntimeHandle {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(CameraRuntimeState {
                camera_id: camera_id.into(),
                status: CameraStatus::Connecting,
                consecutive_failures: 0,
                last_update: None,
                last_update_at: None,
                frames_read: 0,
                frames_analyzed: 0,
                started_at: Utc::now(),
                last_error: None,
            }),
            created: Instant::now(),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub fn snapshot(&self) -> CameraRuntimeState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> CameraStatus {
        self.state.lock().status
    }

    /// Update status and return the connection transition, if any
    pub fn set_status(&self, status: CameraStatus) -> Option<StatusEvent> {
        let mut state = self.state.lock();
        let prev = state.status;
        state.status = status;

        match (prev, status) {
            (CameraStatus::Streaming, CameraStatus::Reconnecting | CameraStatus::Dead) => {
                tracing::warn!(
                    camera_id = %state.camera_id,
                    error = state.last_error.as_deref().unwrap_or("-"),
                    "Camera connection lost"
                );
                Some(StatusEvent::Lost)
            }
            (CameraStatus::Reconnecting, CameraStatus::Streaming) => {
                tracing::info!(camera_id = %state.camera_id, "Camera connection recovered");
                Some(StatusEvent::Recovered)
            }
            (prev, CameraStatus::Dead) if prev != CameraStatus::Dead => {
                tracing::error!(
                    camera_id = %state.camera_id,
                    failures = state.consecutive_failures,
                    "Camera marked dead"
                );
                None
            }
            _ => None,
        }
    }

    /// Successful read
    pub fn record_frame(&self, analyzed: bool, now: Instant) {
        let mut state = self.state.lock();
        state.frames_read += 1;
        if analyzed {
            state.frames_analyzed += 1;
        }
        state.consecutive_failures = 0;
        state.last_update = Some(now);
        state.last_update_at = Some(Utc::now());
    }

    /// Failed open/read; returns the consecutive failure count
    pub fn record_failure(&self, error: &crate::Error) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        state.consecutive_failures
    }

    /// Time since the last successful read (or since creation)
    pub fn staleness(&self, now: Instant) -> Duration {
        let last = self.state.lock().last_update.unwrap_or(self.created);
        now.saturating_duration_since(last)
    }

    pub fn frames_read(&self) -> u64 {
        self.state.lock().frames_read
    }

    /// Ask the worker to exit at its next loop iteration
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            if self.stop_requested() {
                return;
            }
            notified.await;
        }
    }
}
