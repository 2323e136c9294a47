//! ConfigStore data types
//!
//! Per-camera configuration as seen by the camera manager. Owned by the
//! datastore; the pipeline only reads it.

use crate::error::{Error, Result};
use crate::posture::{Metric, MetricFamily};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default tolerance (degrees) around every target
pub const DEFAULT_TOLERANCE: f64 = 15.0;

/// Camera id length limit
pub const MAX_CAMERA_ID_LEN: usize = 64;

/// Target angle and accepted deviation for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTarget {
    pub target: f64,
    pub tolerance: f64,
}

impl MetricTarget {
    pub fn new(target: f64, tolerance: f64) -> Self {
        Self { target, tolerance }
    }

    /// `|value - target| <= tolerance`
    pub fn in_tolerance(&self, value: f64) -> bool {
        (value - self.target).abs() <= self.tolerance
    }
}

/// Escalation thresholds and notification cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Continuous abnormal time before Warning
    pub warning_after: Duration,
    /// Continuous abnormal time before Critical
    pub critical_after: Duration,
    /// Minimum gap between two events of the same (key, level)
    pub cooldown: Duration,
}

impl AlertPolicy {
    pub fn new(warning_after: Duration, critical_after: Duration, cooldown: Duration) -> Self {
        Self {
            warning_after,
            critical_after,
            cooldown,
        }
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            warning_after: Duration::from_secs(60),
            critical_after: Duration::from_secs(300),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub name: String,
    /// RTSP/HTTP URL or local path
    pub source_url: String,
    pub enabled: bool,
    pub targets: BTreeMap<Metric, MetricTarget>,
    pub alert_policy: AlertPolicy,
    /// Problem found while loading the row; the camera stays desired but invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defect: Option<String>,
}

impl CameraConfig {
    /// Camera with default targets for every metric
    pub fn new(camera_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let camera_id = camera_id.into();
        let targets = Metric::ALL
            .into_iter()
            .map(|m| {
                (
                    m,
                    MetricTarget::new(m.family().default_target(), DEFAULT_TOLERANCE),
                )
            })
            .collect();

        Self {
            name: camera_id.clone(),
            camera_id,
            source_url: source_url.into(),
            enabled: true,
            targets,
            alert_policy: AlertPolicy::default(),
            defect: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set target/tolerance for both sides of a family
    pub fn with_family_target(mut self, family: MetricFamily, target: MetricTarget) -> Self {
        for metric in family.metrics() {
            self.targets.insert(metric, target);
        }
        self
    }

    pub fn with_alert_policy(mut self, policy: AlertPolicy) -> Self {
        self.alert_policy = policy;
        self
    }

    pub fn with_defect(mut self, defect: impl Into<String>) -> Self {
        self.defect = Some(defect.into());
        self
    }

    pub fn target(&self, metric: Metric) -> Option<&MetricTarget> {
        self.targets.get(&metric)
    }

    /// True when both configs read from the same source
    pub fn same_source(&self, other: &CameraConfig) -> bool {
        self.source_url == other.source_url
    }

    /// Reject configs the pipeline cannot run
    pub fn validate(&self) -> Result<()> {
        let id = self.camera_id.as_str();
        if let Some(defect) = &self.defect {
            return Err(Error::config_invalid(id, defect.clone()));
        }
        if id.is_empty() || id.len() > MAX_CAMERA_ID_LEN {
            return Err(Error::config_invalid(
                id,
                format!("camera_id must be 1-{} characters", MAX_CAMERA_ID_LEN),
            ));
        }
        if self.source_url.trim().is_empty() {
            return Err(Error::config_invalid(id, "source_url is empty"));
        }
        if self.targets.is_empty() {
            return Err(Error::config_invalid(id, "no metric targets configured"));
        }
        for (metric, target) in &self.targets {
            if !target.target.is_finite() {
                return Err(Error::config_invalid(
                    id,
                    format!("target for {} is not a number", metric),
                ));
            }
            if !target.tolerance.is_finite() || target.tolerance < 0.0 {
                return Err(Error::config_invalid(
                    id,
                    format!("tolerance for {} must be >= 0", metric),
                ));
            }
        }
        let policy = &self.alert_policy;
        if policy.critical_after < policy.warning_after {
            return Err(Error::config_invalid(
                id,
                format!(
                    "critical_after ({}s) is shorter than warning_after ({}s)",
                    policy.critical_after.as_secs(),
                    policy.warning_after.as_secs()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_tolerance_is_inclusive() {
        let target = MetricTarget::new(90.0, 15.0);
        assert!(target.in_tolerance(105.0));
        assert!(target.in_tolerance(75.0));
        assert!(target.in_tolerance(92.0));
        assert!(!target.in_tolerance(40.0));
        assert!(!target.in_tolerance(105.1));
    }

    #[test]
    fn test_new_has_default_targets() {
        let config = CameraConfig::new("cam-001", "rtsp://10.0.0.1/stream");
        assert_eq!(config.targets.len(), Metric::ALL.len());
        assert_eq!(config.target(Metric::LeftNeck).unwrap().target, 180.0);
        assert_eq!(config.target(Metric::RightKnee).unwrap().tolerance, DEFAULT_TOLERANCE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_family_target() {
        let config = CameraConfig::new("cam-001", "rtsp://x")
            .with_family_target(MetricFamily::Elbow, MetricTarget::new(100.0, 10.0));
        assert_eq!(config.target(Metric::LeftElbow).unwrap().target, 100.0);
        assert_eq!(config.target(Metric::RightElbow).unwrap().tolerance, 10.0);
        assert_eq!(config.target(Metric::LeftKnee).unwrap().target, 90.0);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = CameraConfig::new("cam-001", "rtsp://x").with_alert_policy(AlertPolicy::new(
            Duration::from_secs(300),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(CameraConfig::new("", "rtsp://x").validate().is_err());
        assert!(CameraConfig::new("a".repeat(65), "rtsp://x").validate().is_err());
        assert!(CameraConfig::new("cam-001", "  ").validate().is_err());

        let negative = CameraConfig::new("cam-001", "rtsp://x")
            .with_family_target(MetricFamily::Knee, MetricTarget::new(90.0, -1.0));
        assert!(negative.validate().is_err());

        let nan = CameraConfig::new("cam-001", "rtsp://x")
            .with_family_target(MetricFamily::Knee, MetricTarget::new(f64::NAN, 15.0));
        assert!(nan.validate().is_err());

        let mut empty = CameraConfig::new("cam-001", "rtsp://x");
        empty.targets.clear();
        assert!(empty.validate().is_err());
    }
}
