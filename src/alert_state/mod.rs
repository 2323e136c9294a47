//! AlertStateMachine - Per (camera, metric) escalation
//!
//! ## Responsibilities
//!
//! - Track when a metric left its tolerance band (monotonic clock)
//! - Classify continuous abnormal time into Normal / Warning / Critical
//! - Throttle outward events per (key, level) with a cooldown
//!
//! Escalation is driven only by stored timestamps compared at evaluation
//! time. Any in-tolerance reading resets the abnormal duration to zero.

use crate::config_store::{AlertPolicy, CameraConfig, MetricTarget};
use crate::posture::{Metric, PostureSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Escalation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn is_alerting(&self) -> bool {
        *self != AlertLevel::Normal
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one state machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AlertKey {
    pub camera_id: String,
    pub metric: Metric,
}

/// Non-suppressed escalation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub camera_id: String,
    pub metric: Metric,
    pub value: f64,
    pub target: f64,
    pub tolerance: f64,
    pub level: AlertLevel,
    pub timestamp: DateTime<Utc>,
    /// Continuous abnormal time when the event fired
    pub abnormal_duration: Duration,
}

impl AlertEvent {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            camera_id: self.camera_id.clone(),
            metric: self.metric,
        }
    }

    /// Human readable summary for logs and notifications
    pub fn message(&self) -> String {
        format!(
            "camera {}: {} at {:.1}° (target {:.1}° ±{:.1}°) for {}s",
            self.camera_id,
            self.metric,
            self.value,
            self.target,
            self.tolerance,
            self.abnormal_duration.as_secs()
        )
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub level: AlertLevel,
    pub previous: AlertLevel,
    /// Present only when a level was reached and the cooldown allowed it
    pub event: Option<AlertEvent>,
    /// Current alerting state, emitted or not
    pub current: Option<AlertEvent>,
}

impl Evaluation {
    fn normal(previous: AlertLevel) -> Self {
        Self {
            level: AlertLevel::Normal,
            previous,
            event: None,
            current: None,
        }
    }

    /// Metric went from Warning/Critical back to Normal
    pub fn cleared(&self) -> bool {
        self.previous.is_alerting() && !self.level.is_alerting()
    }
}

/// Level for a given continuous abnormal time
pub fn classify(elapsed: Duration, policy: &AlertPolicy) -> AlertLevel {
    if elapsed >= policy.critical_after {
        AlertLevel::Critical
    } else if elapsed >= policy.warning_after {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// State machine for one AlertKey
#[derive(Debug, Clone)]
pub struct AlertStateMachine {
    key: AlertKey,
    abnormal_since: Option<Instant>,
    level: AlertLevel,
    last_emitted: HashMap<AlertLevel, Instant>,
}

impl AlertStateMachine {
    pub fn new(key: AlertKey) -> Self {
        Self {
            key,
            abnormal_since: None,
            level: AlertLevel::Normal,
            last_emitted: HashMap::new(),
        }
    }

    pub fn key(&self) -> &AlertKey {
        &self.key
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    /// Continuous abnormal time as of `now`
    pub fn abnormal_for(&self, now: Instant) -> Option<Duration> {
        self.abnormal_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Feed one reading
    pub fn evaluate(
        &mut self,
        value: f64,
        target: &MetricTarget,
        policy: &AlertPolicy,
        now: Instant,
    ) -> Evaluation {
        let previous = self.level;

        if target.in_tolerance(value) {
            self.abnormal_since = None;
            self.level = AlertLevel::Normal;
            return Evaluation::normal(previous);
        }

        let since = match self.abnormal_since {
            Some(since) => since,
            None => {
                // First abnormal reading only starts the clock
                self.abnormal_since = Some(now);
                self.level = AlertLevel::Normal;
                return Evaluation::normal(previous);
            }
        };

        let elapsed = now.saturating_duration_since(since);
        let level = classify(elapsed, policy);
        self.level = level;

        if !level.is_alerting() {
            return Evaluation::normal(previous);
        }

        let cooled_down = match self.last_emitted.get(&level) {
            Some(last) => now.saturating_duration_since(*last) > policy.cooldown,
            None => true,
        };

        let current = AlertEvent {
            camera_id: self.key.camera_id.clone(),
            metric: self.key.metric,
            value,
            target: target.target,
            tolerance: target.tolerance,
            level,
            timestamp: Utc::now(),
            abnormal_duration: elapsed,
        };
        let event = if cooled_down {
            self.last_emitted.insert(level, now);
            Some(current.clone())
        } else {
            None
        };

        Evaluation {
            level,
            previous,
            event,
            current: Some(current),
        }
    }

    /// Forget the abnormal duration (cooldown history is kept)
    pub fn reset(&mut self) {
        self.abnormal_since = None;
        self.level = AlertLevel::Normal;
    }
}

/// All state machines of one camera
#[derive(Debug, Clone)]
pub struct AlertTracker {
    camera_id: String,
    machines: HashMap<Metric, AlertStateMachine>,
}

impl AlertTracker {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            machines: HashMap::new(),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Evaluate one metric, creating its machine on the first abnormal reading
    pub fn evaluate(
        &mut self,
        metric: Metric,
        value: f64,
        target: &MetricTarget,
        policy: &AlertPolicy,
        now: Instant,
    ) -> Evaluation {
        if !self.machines.contains_key(&metric) && target.in_tolerance(value) {
            return Evaluation::normal(AlertLevel::Normal);
        }

        let camera_id = &self.camera_id;
        self.machines
            .entry(metric)
            .or_insert_with(|| {
                AlertStateMachine::new(AlertKey {
                    camera_id: camera_id.clone(),
                    metric,
                })
            })
            .evaluate(value, target, policy, now)
    }

    /// Evaluate every measured metric that has a configured target
    pub fn evaluate_snapshot(
        &mut self,
        snapshot: &PostureSnapshot,
        config: &CameraConfig,
        now: Instant,
    ) -> Vec<(Metric, Evaluation)> {
        snapshot
            .measurements()
            .iter()
            .filter_map(|(metric, value)| {
                let target = config.target(*metric)?;
                let evaluation =
                    self.evaluate(*metric, *value, target, &config.alert_policy, now);
                Some((*metric, evaluation))
            })
            .collect()
    }

    pub fn level(&self, metric: Metric) -> AlertLevel {
        self.machines
            .get(&metric)
            .map(|m| m.level())
            .unwrap_or(AlertLevel::Normal)
    }

    /// Current level of every tracked metric
    pub fn levels(&self) -> BTreeMap<Metric, AlertLevel> {
        self.machines
            .iter()
            .map(|(metric, machine)| (*metric, machine.level()))
            .collect()
    }

    pub fn tracked_keys(&self) -> usize {
        self.machines.len()
    }

    /// Clear every abnormal duration
    pub fn reset(&mut self) {
        for machine in self.machines.values_mut() {
            machine.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn policy(warning: u64, critical: u64, cooldown: u64) -> AlertPolicy {
        AlertPolicy::new(secs(warning), secs(critical), secs(cooldown))
    }

    fn machine() -> AlertStateMachine {
        AlertStateMachine::new(AlertKey {
            camera_id: "cam-001".to_string(),
            metric: Metric::LeftKnee,
        })
    }

    #[test]
    fn test_classify_boundaries() {
        let p = policy(60, 300, 30);
        assert_eq!(classify(secs(59), &p), AlertLevel::Normal);
        assert_eq!(classify(secs(60), &p), AlertLevel::Warning);
        assert_eq!(classify(secs(299), &p), AlertLevel::Warning);
        assert_eq!(classify(secs(300), &p), AlertLevel::Critical);
    }

    #[test]
    fn test_knee_escalation_scenario() {
        let target = MetricTarget::new(90.0, 15.0);
        let p = policy(60, 300, 30);
        let t0 = Instant::now();
        let mut sm = machine();

        let e = sm.evaluate(40.0, &target, &p, t0);
        assert_eq!(e.level, AlertLevel::Normal);
        assert!(e.event.is_none());

        let e = sm.evaluate(40.0, &target, &p, t0 + secs(65));
        assert_eq!(e.level, AlertLevel::Warning);
        let event = e.event.unwrap();
        assert_eq!(event.level, AlertLevel::Warning);
        assert_eq!(event.abnormal_duration, secs(65));
        assert_eq!(event.value, 40.0);
        assert_eq!(event.target, 90.0);

        let e = sm.evaluate(40.0, &target, &p, t0 + secs(305));
        assert_eq!(e.level, AlertLevel::Critical);
        assert_eq!(e.event.unwrap().level, AlertLevel::Critical);

        let e = sm.evaluate(92.0, &target, &p, t0 + secs(310));
        assert_eq!(e.level, AlertLevel::Normal);
        assert!(e.cleared());
        assert!(sm.abnormal_for(t0 + secs(310)).is_none());

        // Duration restarts from zero
        let e = sm.evaluate(40.0, &target, &p, t0 + secs(311));
        assert_eq!(e.level, AlertLevel::Normal);
        assert!(e.event.is_none());
        assert_eq!(sm.abnormal_for(t0 + secs(371)), Some(secs(60)));
        let e = sm.evaluate(40.0, &target, &p, t0 + secs(370));
        assert_eq!(e.level, AlertLevel::Normal);
        let e = sm.evaluate(40.0, &target, &p, t0 + secs(371));
        assert_eq!(e.level, AlertLevel::Warning);
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let target = MetricTarget::new(90.0, 15.0);
        let p = policy(60, 3600, 60);
        let t0 = Instant::now();
        let mut sm = machine();

        sm.evaluate(40.0, &target, &p, t0);
        assert!(sm.evaluate(40.0, &target, &p, t0 + secs(65)).event.is_some());

        for t in (66..=125).step_by(5) {
            let e = sm.evaluate(40.0, &target, &p, t0 + secs(t));
            assert_eq!(e.level, AlertLevel::Warning);
            assert!(e.event.is_none(), "unexpected repeat at t={}", t);
        }

        assert!(sm.evaluate(40.0, &target, &p, t0 + secs(126)).event.is_some());
    }

    #[test]
    fn test_cooldown_survives_reset() {
        let target = MetricTarget::new(90.0, 15.0);
        let p = policy(5, 300, 60);
        let t0 = Instant::now();
        let mut sm = machine();

        sm.evaluate(40.0, &target, &p, t0);
        assert!(sm.evaluate(40.0, &target, &p, t0 + secs(5)).event.is_some());
        sm.evaluate(90.0, &target, &p, t0 + secs(6));
        sm.evaluate(40.0, &target, &p, t0 + secs(7));

        // Warning again after 5s, but still inside the 60s cooldown
        let e = sm.evaluate(40.0, &target, &p, t0 + secs(12));
        assert_eq!(e.level, AlertLevel::Warning);
        assert!(e.event.is_none());
        // Throttled, but the current state is still reported
        let current = e.current.unwrap();
        assert_eq!(current.level, AlertLevel::Warning);
        assert_eq!(current.abnormal_duration, secs(5));
    }

    #[test]
    fn test_repeated_normal_readings_are_idempotent() {
        let target = MetricTarget::new(90.0, 15.0);
        let p = policy(60, 300, 30);
        let t0 = Instant::now();
        let mut sm = machine();

        for t in 0..5 {
            let e = sm.evaluate(95.0, &target, &p, t0 + secs(t));
            assert_eq!(e.level, AlertLevel::Normal);
            assert!(!e.cleared());
        }
        assert!(sm.abnormal_for(t0 + secs(5)).is_none());
    }

    #[test]
    fn test_tracker_creates_machines_lazily() {
        let config = CameraConfig::new("cam-001", "rtsp://x");
        let target = *config.target(Metric::LeftKnee).unwrap();
        let t0 = Instant::now();
        let mut tracker = AlertTracker::new("cam-001");

        tracker.evaluate(Metric::LeftKnee, 90.0, &target, &config.alert_policy, t0);
        assert_eq!(tracker.tracked_keys(), 0);

        tracker.evaluate(Metric::LeftKnee, 10.0, &target, &config.alert_policy, t0);
        assert_eq!(tracker.tracked_keys(), 1);

        let e = tracker.evaluate(Metric::LeftKnee, 10.0, &target, &config.alert_policy, t0 + secs(61));
        assert_eq!(e.level, AlertLevel::Warning);
        assert_eq!(tracker.level(Metric::LeftKnee), AlertLevel::Warning);
        assert_eq!(tracker.levels().get(&Metric::LeftKnee), Some(&AlertLevel::Warning));

        tracker.reset();
        assert_eq!(tracker.level(Metric::LeftKnee), AlertLevel::Normal);
    }

    #[test]
    fn test_event_message() {
        let event = AlertEvent {
            camera_id: "cam-001".to_string(),
            metric: Metric::LeftKnee,
            value: 40.0,
            target: 90.0,
            tolerance: 15.0,
            level: AlertLevel::Warning,
            timestamp: Utc::now(),
            abnormal_duration: secs(65),
        };
        assert_eq!(
            event.message(),
            "camera cam-001: left_knee at 40.0° (target 90.0° ±15.0°) for 65s"
        );
    }
}
