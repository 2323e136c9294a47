//! MySQL datastore
//!
//! Tables (see migrations/001_posture_schema.sql):
//! - `cameras`: one row per camera, per-family targets and optional thresholds
//! - `alerts`: durable alert log

use super::{AlertPolicy, CameraConfig, Datastore, MetricTarget, DEFAULT_TOLERANCE};
use crate::alert_state::AlertEvent;
use crate::error::{Error, Result};
use crate::posture::MetricFamily;
use async_trait::async_trait;
use sqlx::{FromRow, MySqlPool};
use std::time::Duration;

/// Raw `cameras` row
#[derive(Debug, Clone, FromRow)]
pub struct CameraRow {
    pub camera_id: String,
    pub name: String,
    pub source_url: String,
    pub enabled: bool,
    pub knee_target: Option<f64>,
    pub hip_spine_target: Option<f64>,
    pub elbow_target: Option<f64>,
    pub neck_target: Option<f64>,
    pub angle_tolerance: Option<f64>,
    pub warning_after_sec: Option<i32>,
    pub critical_after_sec: Option<i32>,
    pub cooldown_sec: Option<i32>,
}

fn seconds(camera_id: &str, field: &str, value: Option<i32>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(v) => u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| Error::config_invalid(camera_id, format!("{} must be >= 0", field))),
    }
}

impl CameraRow {
    /// Convert to a CameraConfig, falling back to `default_policy` for unset thresholds
    pub fn into_config(self, default_policy: &AlertPolicy) -> Result<CameraConfig> {
        let tolerance = self.angle_tolerance.unwrap_or(DEFAULT_TOLERANCE);
        let policy = AlertPolicy::new(
            seconds(
                &self.camera_id,
                "warning_after_sec",
                self.warning_after_sec,
                default_policy.warning_after,
            )?,
            seconds(
                &self.camera_id,
                "critical_after_sec",
                self.critical_after_sec,
                default_policy.critical_after,
            )?,
            seconds(
                &self.camera_id,
                "cooldown_sec",
                self.cooldown_sec,
                default_policy.cooldown,
            )?,
        );

        let family_targets = [
            (MetricFamily::Knee, self.knee_target),
            (MetricFamily::HipSpine, self.hip_spine_target),
            (MetricFamily::Elbow, self.elbow_target),
            (MetricFamily::Neck, self.neck_target),
        ];

        let mut config = CameraConfig::new(self.camera_id, self.source_url)
            .with_name(self.name)
            .with_alert_policy(policy);
        config.enabled = self.enabled;
        for (family, target) in family_targets {
            let target = target.unwrap_or_else(|| family.default_target());
            config = config.with_family_target(family, MetricTarget::new(target, tolerance));
        }

        Ok(config)
    }

    /// Like `into_config`, but a bad row still yields its camera, marked so
    /// that `validate` rejects it
    pub fn into_desired(self, default_policy: &AlertPolicy) -> CameraConfig {
        let mut fallback = CameraConfig::new(self.camera_id.clone(), self.source_url.clone())
            .with_name(self.name.clone());
        fallback.enabled = self.enabled;
        match self.into_config(default_policy) {
            Ok(config) => config,
            Err(Error::ConfigInvalid { message, .. }) => fallback.with_defect(message),
            Err(e) => fallback.with_defect(e.to_string()),
        }
    }
}

/// Datastore backed by MySQL
#[derive(Clone)]
pub struct MySqlDatastore {
    pool: MySqlPool,
    default_policy: AlertPolicy,
}

impl MySqlDatastore {
    /// Create new datastore
    pub fn new(pool: MySqlPool, default_policy: AlertPolicy) -> Self {
        Self {
            pool,
            default_policy,
        }
    }

    const CAMERA_COLUMNS: &'static str = r#"
        camera_id, name, source_url, enabled,
        knee_target, hip_spine_target, elbow_target, neck_target,
        angle_tolerance, warning_after_sec, critical_after_sec, cooldown_sec
    "#;
}

#[async_trait]
impl Datastore for MySqlDatastore {
    async fn list_active_cameras(&self) -> Result<Vec<CameraConfig>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE enabled = TRUE ORDER BY camera_id",
            Self::CAMERA_COLUMNS
        );
        let rows = sqlx::query_as::<_, CameraRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        let cameras: Vec<CameraConfig> = rows
            .into_iter()
            .map(|row| row.into_desired(&self.default_policy))
            .collect();
        for camera in cameras.iter().filter(|c| c.defect.is_some()) {
            tracing::warn!(
                camera_id = %camera.camera_id,
                defect = camera.defect.as_deref().unwrap_or("-"),
                "Invalid camera row"
            );
        }

        Ok(cameras)
    }

    async fn insert_alert_event(&self, event: &AlertEvent) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                camera_id, metric, value, target, tolerance,
                level, abnormal_duration_sec, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.camera_id)
        .bind(event.metric.as_str())
        .bind(event.value)
        .bind(event.target)
        .bind(event.tolerance)
        .bind(event.level.as_str())
        .bind(event.abnormal_duration.as_secs_f64())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.last_insert_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::Metric;

    fn row() -> CameraRow {
        CameraRow {
            camera_id: "cam-001".to_string(),
            name: "Line 1".to_string(),
            source_url: "rtsp://10.0.0.5/stream1".to_string(),
            enabled: true,
            knee_target: Some(100.0),
            hip_spine_target: None,
            elbow_target: None,
            neck_target: Some(170.0),
            angle_tolerance: Some(10.0),
            warning_after_sec: Some(5),
            critical_after_sec: None,
            cooldown_sec: None,
        }
    }

    #[test]
    fn test_into_config_applies_row_and_defaults() {
        let config = row().into_config(&AlertPolicy::default()).unwrap();

        assert_eq!(config.name, "Line 1");
        assert_eq!(config.target(Metric::RightKnee).unwrap().target, 100.0);
        assert_eq!(config.target(Metric::LeftNeck).unwrap().target, 170.0);
        assert_eq!(config.target(Metric::LeftElbow).unwrap().target, 90.0);
        assert_eq!(config.target(Metric::LeftElbow).unwrap().tolerance, 10.0);
        assert_eq!(config.alert_policy.warning_after, Duration::from_secs(5));
        assert_eq!(config.alert_policy.critical_after, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_threshold_is_invalid() {
        let mut bad = row();
        bad.cooldown_sec = Some(-1);
        let err = bad.into_config(&AlertPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[test]
    fn test_bad_row_stays_desired_but_invalid() {
        let mut bad = row();
        bad.cooldown_sec = Some(-1);
        let config = bad.into_desired(&AlertPolicy::default());

        assert_eq!(config.camera_id, "cam-001");
        assert_eq!(config.source_url, "rtsp://10.0.0.5/stream1");
        assert!(config.enabled);
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
        assert!(err.to_string().contains("cooldown_sec"));

        assert!(row().into_desired(&AlertPolicy::default()).defect.is_none());
    }
}
