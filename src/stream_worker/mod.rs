//! StreamWorker - One camera's capture and analysis loop
//!
//! ## Responsibilities
//!
//! - Own the camera's source handle for the worker's lifetime
//! - Connect / reconnect with fixed backoff and bounded retries
//! - Sample every Nth frame for perception, geometry and alert evaluation
//! - Publish every frame (annotated or raw) to the FrameBuffer
//! - Forward alert events to the aggregator and dispatcher
//!
//! ## Lifecycle
//!
//! Connecting -> Streaming -> Reconnecting -> ... -> Stopped | Dead
//!
//! Stop is cooperative: the runtime handle's stop flag is observed at every
//! wait point, so a worker exits within one iteration even when its source
//! is stalled.

use crate::alert_aggregator::AlertAggregator;
use crate::alert_dispatch::AlertDispatcher;
use crate::alert_state::{AlertLevel, AlertTracker};
use crate::camera_status::{CameraStatus, RuntimeHandle};
use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use crate::frame_buffer::{Frame, FrameBuffer};
use crate::frame_source::{FrameSource, SourceConnector};
use crate::overlay::{render_overlay, OverlayStyle};
use crate::perception::PerceptionEngine;
use crate::posture::PostureSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consecutive failed opens before the camera is declared dead
    pub max_retries: u32,
    /// Fixed delay between open attempts
    pub retry_backoff: Duration,
    pub open_timeout: Duration,
    /// A read taking longer than this counts as a source failure
    pub read_timeout: Duration,
    /// Analyze one frame out of every N
    pub sample_interval: u64,
    /// Clear in-progress escalation when the source reconnects
    pub reset_alerts_on_reconnect: bool,
    /// None publishes raw frames only
    pub overlay: Option<OverlayStyle>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            sample_interval: 3,
            reset_alerts_on_reconnect: false,
            overlay: Some(OverlayStyle::default()),
        }
    }
}

/// Shared collaborators handed to every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub connector: Arc<dyn SourceConnector>,
    pub perception: Arc<dyn PerceptionEngine>,
    pub frame_buffer: Arc<FrameBuffer>,
    pub aggregator: Arc<AlertAggregator>,
    pub dispatcher: Option<AlertDispatcher>,
}

/// How a worker ended
#[derive(Debug)]
pub enum WorkerExit {
    /// Stop was requested
    Stopped,
    /// Retries exhausted or unrecoverable source error
    Failed(Error),
}

impl WorkerExit {
    pub fn is_failed(&self) -> bool {
        matches!(self, WorkerExit::Failed(_))
    }
}

enum StreamEnd {
    Stopped,
    Lost(Error),
}

/// StreamWorker instance
pub struct StreamWorker {
    camera_id: String,
    camera: watch::Receiver<Arc<CameraConfig>>,
    runtime: Arc<RuntimeHandle>,
    tracker: Arc<Mutex<AlertTracker>>,
    ctx: WorkerContext,
    config: WorkerConfig,
    frame_counter: u64,
}

impl StreamWorker {
    /// Create new StreamWorker
    pub fn new(
        camera: watch::Receiver<Arc<CameraConfig>>,
        runtime: Arc<RuntimeHandle>,
        tracker: Arc<Mutex<AlertTracker>>,
        ctx: WorkerContext,
        config: WorkerConfig,
    ) -> Self {
        let camera_id = camera.borrow().camera_id.clone();
        Self {
            camera_id,
            camera,
            runtime,
            tracker,
            ctx,
            config,
            frame_counter: 0,
        }
    }

    /// Run on the tokio runtime
    pub fn spawn(self) -> JoinHandle<WorkerExit> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> WorkerExit {
        tracing::info!(camera_id = %self.camera_id, "Stream worker started");

        let exit = loop {
            let source = match self.connect().await {
                Ok(Some(source)) => source,
                Ok(None) => break WorkerExit::Stopped,
                Err(e) => {
                    self.runtime.set_status(CameraStatus::Dead);
                    break WorkerExit::Failed(e);
                }
            };

            match self.stream(source).await {
                StreamEnd::Stopped => break WorkerExit::Stopped,
                StreamEnd::Lost(e) => {
                    self.runtime.record_failure(&e);
                    self.runtime.set_status(CameraStatus::Reconnecting);
                    if self.config.reset_alerts_on_reconnect {
                        self.reset_alerts();
                    }
                    if !self.backoff().await {
                        break WorkerExit::Stopped;
                    }
                }
            }
        };

        match &exit {
            WorkerExit::Stopped => {
                self.runtime.set_status(CameraStatus::Stopped);
                tracing::info!(
                    camera_id = %self.camera_id,
                    frames = self.frame_counter,
                    "Stream worker stopped"
                );
            }
            WorkerExit::Failed(e) => {
                tracing::error!(
                    camera_id = %self.camera_id,
                    error = %e,
                    kind = e.kind(),
                    "Stream worker failed"
                );
            }
        }
        exit
    }

    /// Open the source. `Ok(None)` when stopped while connecting.
    async fn connect(&mut self) -> Result<Option<Box<dyn FrameSource>>> {
        let mut attempts: u32 = 0;
        loop {
            if self.runtime.stop_requested() {
                return Ok(None);
            }

            let camera = self.camera.borrow().clone();
            let open = tokio::time::timeout(self.config.open_timeout, self.ctx.connector.open(&camera));
            let result = tokio::select! {
                biased;
                _ = self.runtime.stopped() => return Ok(None),
                r = open => r.unwrap_or_else(|_| {
                    Err(Error::source_unavailable(
                        &self.camera_id,
                        format!("open timed out after {}ms", self.config.open_timeout.as_millis()),
                    ))
                }),
            };

            match result {
                Ok(source) => {
                    self.runtime.set_status(CameraStatus::Streaming);
                    return Ok(Some(source));
                }
                Err(e) => {
                    attempts += 1;
                    self.runtime.record_failure(&e);
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Source open failed"
                    );
                    if !e.is_retryable() || attempts >= self.config.max_retries {
                        return Err(e);
                    }
                    if !self.backoff().await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Sleep the retry backoff; false when stopped meanwhile
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.runtime.stopped() => false,
            _ = tokio::time::sleep(self.config.retry_backoff) => true,
        }
    }

    async fn stream(&mut self, mut source: Box<dyn FrameSource>) -> StreamEnd {
        let interval = self.config.sample_interval.max(1);
        loop {
            if self.runtime.stop_requested() {
                return StreamEnd::Stopped;
            }

            let read = tokio::select! {
                biased;
                _ = self.runtime.stopped() => return StreamEnd::Stopped,
                r = tokio::time::timeout(self.config.read_timeout, source.read_frame()) => r,
            };

            let data = match read {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => return StreamEnd::Lost(e),
                Err(_) => {
                    return StreamEnd::Lost(Error::source_unavailable(
                        &self.camera_id,
                        format!("read timed out after {}ms", self.config.read_timeout.as_millis()),
                    ))
                }
            };

            self.frame_counter += 1;
            let frame = Frame::new(data, self.frame_counter);
            let sampled = self.frame_counter % interval == 0;
            let frame = if sampled { self.analyze(frame).await } else { frame };

            self.ctx.frame_buffer.publish(&self.camera_id, frame);
            self.runtime.record_frame(sampled, Instant::now());
        }
    }

    /// Perception -> geometry -> alert evaluation -> overlay
    async fn analyze(&self, frame: Frame) -> Frame {
        let camera = self.camera.borrow().clone();

        let points = match self.ctx.perception.extract(&self.camera_id, &frame).await {
            Ok(Some(points)) => points,
            Ok(None) => {
                tracing::trace!(camera_id = %self.camera_id, "No person detected");
                return frame;
            }
            Err(e) => {
                tracing::warn!(camera_id = %self.camera_id, error = %e, "Perception failed");
                return frame;
            }
        };

        let snapshot = PostureSnapshot::from_points(points);
        if snapshot.is_empty() {
            return frame;
        }

        let now = Instant::now();
        let (evaluations, levels) = {
            let mut tracker = self.tracker.lock();
            let evaluations = tracker.evaluate_snapshot(&snapshot, &camera, now);
            (evaluations, tracker.levels())
        };

        for (metric, evaluation) in evaluations {
            let cleared = evaluation.cleared();
            // The snapshot follows the tracker even while emission is throttled
            if let Some(current) = evaluation.current {
                self.ctx.aggregator.set_active(current);
            }
            if let Some(event) = evaluation.event {
                tracing::warn!(
                    camera_id = %self.camera_id,
                    metric = %metric,
                    level = %event.level,
                    value = event.value,
                    duration_secs = event.abnormal_duration.as_secs(),
                    "Posture alert raised"
                );
                self.ctx.aggregator.record(event.clone());
                if let Some(dispatcher) = &self.ctx.dispatcher {
                    dispatcher.dispatch(event);
                }
            } else if cleared {
                self.ctx.aggregator.resolve(&self.camera_id, metric);
                tracing::info!(
                    camera_id = %self.camera_id,
                    metric = %metric,
                    previous = %evaluation.previous,
                    "Posture corrected"
                );
            }
        }

        let Some(style) = self.config.overlay else {
            return frame;
        };
        let raw = frame.clone();
        match tokio::task::spawn_blocking(move || render_overlay(&raw, &snapshot, &levels, &style)).await {
            Ok(Ok(annotated)) => annotated,
            Ok(Err(e)) => {
                tracing::debug!(camera_id = %self.camera_id, error = %e, "Overlay skipped");
                frame
            }
            Err(e) => {
                tracing::warn!(camera_id = %self.camera_id, error = %e, "Overlay task failed");
                frame
            }
        }
    }

    fn reset_alerts(&self) {
        let levels = {
            let mut tracker = self.tracker.lock();
            let levels = tracker.levels();
            tracker.reset();
            levels
        };
        for (metric, level) in levels {
            if level != AlertLevel::Normal {
                self.ctx.aggregator.resolve(&self.camera_id, metric);
            }
        }
        tracing::debug!(camera_id = %self.camera_id, "Alert state reset on reconnect");
    }
}
