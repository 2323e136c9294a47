//! Posture metric catalogue

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric families share one configured target per camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    /// hip - knee - ankle
    Knee,
    /// spine (shoulder midpoint) - hip - knee
    HipSpine,
    /// shoulder - elbow - wrist
    Elbow,
    /// hip - shoulder - head (ear midpoint)
    Neck,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 4] = [
        MetricFamily::Knee,
        MetricFamily::HipSpine,
        MetricFamily::Elbow,
        MetricFamily::Neck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::Knee => "knee",
            MetricFamily::HipSpine => "hip_spine",
            MetricFamily::Elbow => "elbow",
            MetricFamily::Neck => "neck",
        }
    }

    /// Ergonomic target angle in degrees
    pub fn default_target(&self) -> f64 {
        match self {
            MetricFamily::Knee | MetricFamily::HipSpine | MetricFamily::Elbow => 90.0,
            MetricFamily::Neck => 180.0,
        }
    }

    pub fn metrics(&self) -> [Metric; 2] {
        match self {
            MetricFamily::Knee => [Metric::LeftKnee, Metric::RightKnee],
            MetricFamily::HipSpine => [Metric::LeftHipSpine, Metric::RightHipSpine],
            MetricFamily::Elbow => [Metric::LeftElbow, Metric::RightElbow],
            MetricFamily::Neck => [Metric::LeftNeck, Metric::RightNeck],
        }
    }
}

/// A monitored joint angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    LeftKnee,
    RightKnee,
    LeftHipSpine,
    RightHipSpine,
    LeftElbow,
    RightElbow,
    LeftNeck,
    RightNeck,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::LeftKnee,
        Metric::RightKnee,
        Metric::LeftHipSpine,
        Metric::RightHipSpine,
        Metric::LeftElbow,
        Metric::RightElbow,
        Metric::LeftNeck,
        Metric::RightNeck,
    ];

    pub fn family(&self) -> MetricFamily {
        match self {
            Metric::LeftKnee | Metric::RightKnee => MetricFamily::Knee,
            Metric::LeftHipSpine | Metric::RightHipSpine => MetricFamily::HipSpine,
            Metric::LeftElbow | Metric::RightElbow => MetricFamily::Elbow,
            Metric::LeftNeck | Metric::RightNeck => MetricFamily::Neck,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::LeftKnee => "left_knee",
            Metric::RightKnee => "right_knee",
            Metric::LeftHipSpine => "left_hip_spine",
            Metric::RightHipSpine => "right_hip_spine",
            Metric::LeftElbow => "left_elbow",
            Metric::RightElbow => "right_elbow",
            Metric::LeftNeck => "left_neck",
            Metric::RightNeck => "right_neck",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_metric_belongs_to_its_family() {
        for family in MetricFamily::ALL {
            for metric in family.metrics() {
                assert_eq!(metric.family(), family);
            }
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::from_name(metric.as_str()), Some(metric));
        }
        assert_eq!(
            serde_json::to_string(&Metric::LeftHipSpine).unwrap(),
            "\"left_hip_spine\""
        );
    }
}
