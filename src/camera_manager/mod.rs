//! CameraManager - Desired-set reconciliation and worker supervision
//!
//! ## Responsibilities
//!
//! - Reconcile the desired camera set against running stream workers
//! - Probe reachability before starting a worker
//! - Stop workers cooperatively with a bounded join
//! - Health-check workers: forced restart on staleness, Dead after repeated failure
//! - Push live config changes to running workers
//!
//! ## Design
//!
//! Workers live in a sharded registry keyed by camera id; an entry is only
//! inserted through the map's entry API, so there is never more than one
//! worker per camera. Map guards are never held across an await. Every
//! per-camera failure (including a panicking probe) is logged and contained.

use crate::alert_state::AlertTracker;
use crate::camera_status::{CameraRuntimeState, CameraStatus, RuntimeHandle};
use crate::config_store::{CameraConfig, ConfigStore};
use crate::error::Error;
use crate::stream_worker::{StreamWorker, WorkerConfig, WorkerContext, WorkerExit};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub reconcile_interval: Duration,
    pub probe_timeout: Duration,
    /// Wait for a stopping worker before aborting it
    pub join_timeout: Duration,
    /// No successful read for this long triggers a forced restart
    pub stale_threshold: Duration,
    /// Consecutive probe failures / forced restarts before Dead
    pub max_retries: u32,
    pub worker: WorkerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(3),
            join_timeout: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(30),
            max_retries: 3,
            worker: WorkerConfig::default(),
        }
    }
}

/// A camera excluded until it leaves and re-enters the desired set
#[derive(Debug, Clone, Serialize)]
pub struct DeadCamera {
    pub camera_id: String,
    pub reason: String,
    pub declared_at: DateTime<Utc>,
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    /// Config pushed to a running worker without restart
    pub updated: Vec<String>,
    /// Source changed: worker replaced
    pub restarted: Vec<String>,
    /// Invalid config
    pub skipped: Vec<String>,
    /// Probe failed, will retry next reconciliation
    pub probe_failed: Vec<String>,
    pub dead: Vec<String>,
}

impl ReconcileReport {
    pub fn has_changes(&self) -> bool {
        !(self.started.is_empty()
            && self.stopped.is_empty()
            && self.updated.is_empty()
            && self.restarted.is_empty()
            && self.dead.is_empty())
    }
}

/// Outcome of one health check
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub restarted: Vec<String>,
    pub dead: Vec<String>,
}

struct WorkerEntry {
    config: Arc<CameraConfig>,
    config_tx: watch::Sender<Arc<CameraConfig>>,
    runtime: Arc<RuntimeHandle>,
    tracker: Arc<Mutex<AlertTracker>>,
    handle: JoinHandle<WorkerExit>,
    forced_restarts: u32,
    /// Frames read as of the previous health check
    frames_seen: u64,
}

enum Verdict {
    Healthy,
    Restart(Error),
    Dead(String),
}

/// CameraManager instance
pub struct CameraManager {
    config: ManagerConfig,
    ctx: WorkerContext,
    workers: DashMap<String, WorkerEntry>,
    probe_failures: DashMap<String, u32>,
    dead: DashMap<String, DeadCamera>,
    running: AtomicBool,
    shutdown: Notify,
}

impl CameraManager {
    /// Create new CameraManager
    pub fn new(config: ManagerConfig, ctx: WorkerContext) -> Self {
        Self {
            config,
            ctx,
            workers: DashMap::new(),
            probe_failures: DashMap::new(),
            dead: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Bring running workers in line with `desired`
    pub async fn reconcile(&self, desired: &[CameraConfig]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let desired_ids: HashSet<&str> = desired.iter().map(|c| c.camera_id.as_str()).collect();
        let mut valid: BTreeMap<String, Arc<CameraConfig>> = BTreeMap::new();
        for camera in desired {
            if let Err(e) = camera.validate() {
                tracing::warn!(camera_id = %camera.camera_id, error = %e, "Skipping camera with invalid config");
                report.skipped.push(camera.camera_id.clone());
                continue;
            }
            if valid.contains_key(&camera.camera_id) {
                tracing::warn!(camera_id = %camera.camera_id, "Duplicate camera id in desired set, keeping first");
                continue;
            }
            valid.insert(camera.camera_id.clone(), Arc::new(camera.clone()));
        }

        // Leaving the desired set clears dead marks and probe history
        self.dead.retain(|id, _| {
            let keep = desired_ids.contains(id.as_str());
            if !keep {
                tracing::info!(camera_id = %id, "Dead camera left desired set, eligible again");
            }
            keep
        });
        self.probe_failures.retain(|id, _| desired_ids.contains(id.as_str()));

        let to_stop: Vec<String> = self
            .workers
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !desired_ids.contains(id.as_str()))
            .collect();
        join_all(to_stop.iter().map(|id| self.stop(id))).await;
        for id in &to_stop {
            self.release_surfaces(id);
        }
        report.stopped = to_stop;

        let mut to_start: Vec<Arc<CameraConfig>> = Vec::new();
        let mut to_restart: Vec<Arc<CameraConfig>> = Vec::new();
        for (id, camera) in &valid {
            let Some(mut entry) = self.workers.get_mut(id) else {
                if !self.dead.contains_key(id) {
                    to_start.push(camera.clone());
                }
                continue;
            };
            if !entry.config.same_source(camera) {
                to_restart.push(camera.clone());
            } else if *entry.config != **camera {
                entry.config_tx.send_replace(camera.clone());
                entry.config = camera.clone();
                tracing::info!(camera_id = %id, "Camera config updated");
                report.updated.push(id.clone());
            }
        }

        for camera in to_restart {
            let id = camera.camera_id.clone();
            // New source, new scene: old alert state does not carry over
            self.stop(&id).await;
            self.ctx.aggregator.clear_active(&id);
            let tracker = Arc::new(Mutex::new(AlertTracker::new(id.clone())));
            if self.insert_worker(camera, tracker, 0) {
                tracing::info!(camera_id = %id, "Camera source changed, worker restarted");
                report.restarted.push(id);
            }
        }

        let probes = to_start.into_iter().map(|camera| async move {
            let outcome = self.probe(&camera).await;
            (camera, outcome)
        });
        for (camera, outcome) in join_all(probes).await {
            let id = camera.camera_id.clone();
            match outcome {
                Ok(()) => {
                    self.probe_failures.remove(&id);
                    let tracker = Arc::new(Mutex::new(AlertTracker::new(id.clone())));
                    if self.insert_worker(camera, tracker, 0) {
                        tracing::info!(camera_id = %id, "Camera started");
                        report.started.push(id);
                    }
                }
                Err(e) => {
                    let failures = {
                        let mut count = self.probe_failures.entry(id.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    tracing::warn!(
                        camera_id = %id,
                        failures,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Camera probe failed"
                    );
                    if failures >= self.config.max_retries {
                        self.probe_failures.remove(&id);
                        self.mark_dead(&id, format!("probe failed {} times: {}", failures, e));
                        report.dead.push(id);
                    } else {
                        report.probe_failed.push(id);
                    }
                }
            }
        }

        report
    }

    /// Bounded reachability check; a panicking connector counts as a failure
    async fn probe(&self, camera: &CameraConfig) -> crate::Result<()> {
        let timeout = self.config.probe_timeout;
        let attempt = tokio::time::timeout(timeout, self.ctx.connector.probe(camera, timeout));
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::source_unavailable(
                &camera.camera_id,
                format!("probe timed out after {}ms", timeout.as_millis()),
            )),
            Err(_) => Err(Error::Internal(format!(
                "probe panicked for camera {}",
                camera.camera_id
            ))),
        }
    }

    /// Spawn a worker unless one already exists; true when spawned
    fn insert_worker(
        &self,
        camera: Arc<CameraConfig>,
        tracker: Arc<Mutex<AlertTracker>>,
        forced_restarts: u32,
    ) -> bool {
        match self.workers.entry(camera.camera_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(camera_id = %camera.camera_id, "Worker already running");
                false
            }
            Entry::Vacant(slot) => {
                let (config_tx, config_rx) = watch::channel(camera.clone());
                let runtime = Arc::new(RuntimeHandle::new(camera.camera_id.clone()));
                let worker = StreamWorker::new(
                    config_rx,
                    runtime.clone(),
                    tracker.clone(),
                    self.ctx.clone(),
                    self.config.worker.clone(),
                );
                slot.insert(WorkerEntry {
                    config: camera,
                    config_tx,
                    runtime,
                    tracker,
                    handle: worker.spawn(),
                    forced_restarts,
                    frames_seen: 0,
                });
                true
            }
        }
    }

    /// Stop a camera's worker; returns the removed entry
    async fn stop(&self, camera_id: &str) -> Option<WorkerEntry> {
        let (_, mut entry) = self.workers.remove(camera_id)?;
        entry.runtime.request_stop();

        match tokio::time::timeout(self.config.join_timeout, &mut entry.handle).await {
            Ok(Ok(exit)) => {
                tracing::debug!(camera_id = %camera_id, exit = ?exit, "Worker joined");
            }
            Ok(Err(e)) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Worker task ended abnormally");
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    join_timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "Worker did not stop in time, aborting"
                );
                entry.handle.abort();
            }
        }
        tracing::info!(camera_id = %camera_id, "Camera stopped");
        Some(entry)
    }

    /// Stop a camera outside of reconciliation (it returns on the next reconcile if still desired)
    pub async fn stop_camera(&self, camera_id: &str) -> bool {
        self.stop(camera_id).await.is_some()
    }

    fn release_surfaces(&self, camera_id: &str) {
        self.ctx.frame_buffer.remove(camera_id);
        self.ctx.aggregator.remove_camera(camera_id);
    }

    fn mark_dead(&self, camera_id: &str, reason: String) {
        tracing::error!(camera_id = %camera_id, reason = %reason, "Camera declared dead");
        self.dead.insert(
            camera_id.to_string(),
            DeadCamera {
                camera_id: camera_id.to_string(),
                reason,
                declared_at: Utc::now(),
            },
        );
    }

    /// Restart stale workers, retire dead ones
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        let now = Instant::now();
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();

        for id in ids {
            let verdict = {
                let Some(mut entry) = self.workers.get_mut(&id) else {
                    continue;
                };
                let runtime = entry.runtime.clone();
                let status = runtime.status();
                let staleness = runtime.staleness(now);

                if status == CameraStatus::Dead {
                    let reason = runtime
                        .snapshot()
                        .last_error
                        .unwrap_or_else(|| "retries exhausted".to_string());
                    Verdict::Dead(reason)
                } else if entry.handle.is_finished() {
                    Verdict::Restart(Error::Internal("worker exited unexpectedly".to_string()))
                } else if staleness > self.config.stale_threshold {
                    Verdict::Restart(Error::StaleWorker(format!(
                        "{}: no frame for {}s",
                        id,
                        staleness.as_secs()
                    )))
                } else {
                    // Recovery needs reads advancing across two checks, not a single frame
                    let frames = runtime.frames_read();
                    if entry.frames_seen > 0 && frames > entry.frames_seen {
                        entry.forced_restarts = 0;
                    }
                    entry.frames_seen = frames;
                    Verdict::Healthy
                }
            };

            match verdict {
                Verdict::Healthy => report.healthy.push(id),
                Verdict::Dead(reason) => {
                    self.stop(&id).await;
                    self.mark_dead(&id, reason);
                    report.dead.push(id);
                }
                Verdict::Restart(reason) => {
                    let Some(entry) = self.stop(&id).await else {
                        continue;
                    };
                    if entry.forced_restarts >= self.config.max_retries {
                        self.mark_dead(
                            &id,
                            format!("{} after {} forced restarts", reason, entry.forced_restarts),
                        );
                        report.dead.push(id);
                        continue;
                    }
                    tracing::warn!(
                        camera_id = %id,
                        attempt = entry.forced_restarts + 1,
                        max_retries = self.config.max_retries,
                        reason = %reason,
                        "Forcing worker restart"
                    );
                    if self.insert_worker(entry.config, entry.tracker, entry.forced_restarts + 1) {
                        report.restarted.push(id);
                    }
                }
            }
        }

        report
    }

    /// Periodic reconcile + health check until `shutdown`
    pub async fn run(&self, config_store: &ConfigStore) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Camera manager already running");
            return;
        }
        tracing::info!(
            interval_secs = self.config.reconcile_interval.as_secs(),
            "Starting camera manager"
        );

        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match config_store.refresh_cache().await {
                Ok(_) => {
                    let desired = config_store.get_cached_cameras().await;
                    let report = self.reconcile(&desired).await;
                    if report.has_changes() {
                        tracing::info!(
                            started = report.started.len(),
                            stopped = report.stopped.len(),
                            updated = report.updated.len(),
                            restarted = report.restarted.len(),
                            dead = report.dead.len(),
                            running = self.workers.len(),
                            "Reconciliation complete"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Desired camera set unavailable, skipping reconciliation");
                }
            }

            let health = self.health_check().await;
            if !health.restarted.is_empty() || !health.dead.is_empty() {
                tracing::info!(
                    restarted = health.restarted.len(),
                    dead = health.dead.len(),
                    "Health check complete"
                );
            }
        }

        tracing::info!("Camera manager loop stopped");
    }

    /// Stop the run loop and every worker
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();

        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        join_all(ids.iter().map(|id| self.stop(id))).await;
        tracing::info!(stopped = ids.len(), "Camera manager shut down");
    }

    pub fn running_cameras(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.workers.contains_key(camera_id)
    }

    pub fn runtime(&self, camera_id: &str) -> Option<Arc<RuntimeHandle>> {
        self.workers.get(camera_id).map(|e| e.runtime.clone())
    }

    pub fn camera_state(&self, camera_id: &str) -> Option<CameraRuntimeState> {
        self.runtime(camera_id).map(|r| r.snapshot())
    }

    pub fn camera_states(&self) -> Vec<CameraRuntimeState> {
        let runtimes: Vec<Arc<RuntimeHandle>> =
            self.workers.iter().map(|e| e.runtime.clone()).collect();
        let mut states: Vec<CameraRuntimeState> = runtimes.iter().map(|r| r.snapshot()).collect();
        states.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        states
    }

    pub fn current_config(&self, camera_id: &str) -> Option<Arc<CameraConfig>> {
        self.workers.get(camera_id).map(|e| e.config.clone())
    }

    pub fn is_dead(&self, camera_id: &str) -> bool {
        self.dead.contains_key(camera_id)
    }

    pub fn dead_cameras(&self) -> Vec<DeadCamera> {
        let mut dead: Vec<DeadCamera> = self.dead.iter().map(|e| e.value().clone()).collect();
        dead.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        dead
    }
}
