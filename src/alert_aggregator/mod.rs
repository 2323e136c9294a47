//! AlertAggregator - Active alerts and windowed history
//!
//! ## Responsibilities
//!
//! - Per-camera active-alert snapshot (current Warning/Critical sets)
//! - Time-windowed, capacity-bounded alert history
//! - Statistics by level, metric and camera
//!
//! History is pruned lazily on `record`; there is no sweep task. Each camera
//! has its own map entry, so recording for one camera never blocks another.

use crate::alert_state::{AlertEvent, AlertLevel};
use crate::posture::Metric;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Aggregator settings
#[derive(Debug, Clone)]
pub struct AlertAggregatorConfig {
    /// History retention window
    pub window: Duration,
    /// Hard cap on history entries per camera
    pub max_events_per_camera: usize,
}

impl Default for AlertAggregatorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            max_events_per_camera: 5000,
        }
    }
}

/// History entry
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub alert_id: u64,
    #[serde(flatten)]
    pub event: AlertEvent,
}

/// Current alert state of one camera
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActiveAlertSnapshot {
    pub camera_id: String,
    pub warning: BTreeSet<Metric>,
    pub critical: BTreeSet<Metric>,
    /// Latest event per alerting metric
    pub latest: Vec<AlertEvent>,
}

impl ActiveAlertSnapshot {
    pub fn is_empty(&self) -> bool {
        self.warning.is_empty() && self.critical.is_empty()
    }

    pub fn worst_level(&self) -> AlertLevel {
        if !self.critical.is_empty() {
            AlertLevel::Critical
        } else if !self.warning.is_empty() {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

/// Counts per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub warning: usize,
    pub critical: usize,
}

impl LevelCounts {
    fn add(&mut self, level: AlertLevel) {
        match level {
            AlertLevel::Warning => self.warning += 1,
            AlertLevel::Critical => self.critical += 1,
            AlertLevel::Normal => {}
        }
    }

    pub fn total(&self) -> usize {
        self.warning + self.critical
    }
}

/// Alert statistics over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertStatistics {
    pub window_secs: u64,
    pub total: usize,
    pub by_level: LevelCounts,
    pub by_metric: BTreeMap<Metric, LevelCounts>,
    pub by_camera: BTreeMap<String, LevelCounts>,
}

#[derive(Debug, Default)]
struct CameraAlerts {
    history: VecDeque<AlertRecord>,
    active: BTreeMap<Metric, AlertEvent>,
}

impl CameraAlerts {
    fn prune(&mut self, cutoff: DateTime<Utc>, capacity: usize) {
        while self
            .history
            .front()
            .map_or(false, |r| r.event.timestamp < cutoff)
        {
            self.history.pop_front();
        }
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// AlertAggregator instance
pub struct AlertAggregator {
    config: AlertAggregatorConfig,
    cameras: DashMap<String, CameraAlerts>,
    next_id: AtomicU64,
}

impl AlertAggregator {
    /// Create new AlertAggregator
    pub fn new(config: AlertAggregatorConfig) -> Self {
        Self {
            config,
            cameras: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append to history and update the active snapshot
    pub fn record(&self, event: AlertEvent) -> u64 {
        let alert_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cutoff = cutoff(Utc::now(), self.config.window);

        let mut entry = self.cameras.entry(event.camera_id.clone()).or_default();
        if event.level.is_alerting() {
            entry.active.insert(event.metric, event.clone());
        }
        entry.history.push_back(AlertRecord { alert_id, event });
        entry.prune(cutoff, self.config.max_events_per_camera);

        tracing::debug!(alert_id, history_len = entry.history.len(), "Alert recorded");
        alert_id
    }

    /// Track a metric's current level without touching history
    pub fn set_active(&self, event: AlertEvent) {
        if !event.level.is_alerting() {
            return;
        }
        let mut entry = self.cameras.entry(event.camera_id.clone()).or_default();
        entry.active.insert(event.metric, event);
    }

    /// Metric returned to tolerance; drop it from the active snapshot
    pub fn resolve(&self, camera_id: &str, metric: Metric) -> Option<AlertEvent> {
        self.cameras
            .get_mut(camera_id)
            .and_then(|mut entry| entry.active.remove(&metric))
    }

    /// Drop every active alert of a camera, keeping history
    pub fn clear_active(&self, camera_id: &str) {
        if let Some(mut entry) = self.cameras.get_mut(camera_id) {
            entry.active.clear();
        }
    }

    pub fn active_alerts(&self, camera_id: &str) -> ActiveAlertSnapshot {
        let mut snapshot = ActiveAlertSnapshot {
            camera_id: camera_id.to_string(),
            ..Default::default()
        };
        if let Some(entry) = self.cameras.get(camera_id) {
            for (metric, event) in &entry.active {
                match event.level {
                    AlertLevel::Critical => {
                        snapshot.critical.insert(*metric);
                    }
                    AlertLevel::Warning => {
                        snapshot.warning.insert(*metric);
                    }
                    AlertLevel::Normal => continue,
                }
                snapshot.latest.push(event.clone());
            }
        }
        snapshot
    }

    /// Newest-first history for a camera
    pub fn recent(&self, camera_id: &str, limit: usize) -> Vec<AlertRecord> {
        let cutoff = cutoff(Utc::now(), self.config.window);
        self.cameras
            .get(camera_id)
            .map(|entry| {
                entry
                    .history
                    .iter()
                    .rev()
                    .filter(|r| r.event.timestamp >= cutoff)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counts over `window` (capped by the retention window), for one camera or all
    pub fn statistics(&self, camera_id: Option<&str>, window: Duration) -> AlertStatistics {
        let window = window.min(self.config.window);
        let cutoff = cutoff(Utc::now(), window);
        let mut stats = AlertStatistics {
            window_secs: window.as_secs(),
            ..Default::default()
        };

        for entry in self.cameras.iter() {
            if camera_id.map_or(false, |id| id != entry.key().as_str()) {
                continue;
            }
            for record in entry.history.iter().filter(|r| r.event.timestamp >= cutoff) {
                let level = record.event.level;
                stats.total += 1;
                stats.by_level.add(level);
                stats.by_metric.entry(record.event.metric).or_default().add(level);
                stats
                    .by_camera
                    .entry(entry.key().clone())
                    .or_default()
                    .add(level);
            }
        }

        stats
    }

    /// Drop all state for a camera (stopped or dead)
    pub fn remove_camera(&self, camera_id: &str) {
        if let Some((_, alerts)) = self.cameras.remove(camera_id) {
            tracing::debug!(
                camera_id = %camera_id,
                history_len = alerts.history.len(),
                "Alert history removed"
            );
        }
    }

    pub fn history_len(&self, camera_id: &str) -> usize {
        self.cameras
            .get(camera_id)
            .map(|e| e.history.len())
            .unwrap_or(0)
    }
}

impl Default for AlertAggregator {
    fn default() -> Self {
        Self::new(AlertAggregatorConfig::default())
    }
}
