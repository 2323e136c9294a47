//! Fakes shared by unit tests

use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use crate::frame_buffer::Frame;
use crate::frame_source::{FrameSource, SourceConnector};
use crate::perception::{Landmark, PerceptionEngine, Point, PointSet};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const FAKE_JPEG: &[u8] = b"\xFF\xD8fake-frame\xFF\xD9";

/// Left hip/knee/ankle placed so that the left knee angle is `degrees`
pub fn knee_points(degrees: f64) -> PointSet {
    let knee = Point::new(0.5, 0.5);
    let theta = (degrees - 90.0).to_radians();
    PointSet::new()
        .with(Landmark::LeftHip, Point::new(0.5, 0.3))
        .with(Landmark::LeftKnee, knee)
        .with(
            Landmark::LeftAnkle,
            Point::new(knee.x + 0.2 * theta.cos(), knee.y + 0.2 * theta.sin()),
        )
}

/// Behaviour of one camera's fake source
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Remaining opens that fail (u32::MAX = always)
    pub fail_opens: u32,
    /// Frames per session before the read fails
    pub session_frames: Option<u64>,
    /// Frames per session before reads hang forever
    pub stall_after: Option<u64>,
    /// Open takes this long
    pub open_delay: Option<Duration>,
    pub panic_on_open: bool,
}

impl Script {
    pub fn failing_opens(n: u32) -> Self {
        Self {
            fail_opens: n,
            ..Default::default()
        }
    }

    pub fn sessions_of(frames: u64) -> Self {
        Self {
            session_frames: Some(frames),
            ..Default::default()
        }
    }

    pub fn stall_after(frames: u64) -> Self {
        Self {
            stall_after: Some(frames),
            ..Default::default()
        }
    }

    pub fn slow_open(delay: Duration) -> Self {
        Self {
            open_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_open: true,
            ..Default::default()
        }
    }
}

/// Connector whose per-camera behaviour is scripted
pub struct ScriptedConnector {
    frame_interval: Duration,
    scripts: Mutex<HashMap<String, Script>>,
    opens: Mutex<HashMap<String, u32>>,
}

impl ScriptedConnector {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            scripts: Mutex::new(HashMap::new()),
            opens: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_script(&self, camera_id: &str, script: Script) {
        self.scripts.lock().insert(camera_id.to_string(), script);
    }

    pub fn opens(&self, camera_id: &str) -> u32 {
        self.opens.lock().get(camera_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
        *self.opens.lock().entry(camera.camera_id.clone()).or_insert(0) += 1;

        let script = {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(camera.camera_id.clone()).or_default();
            let snapshot = script.clone();
            if script.fail_opens > 0 && script.fail_opens != u32::MAX {
                script.fail_opens -= 1;
            }
            snapshot
        };

        if script.panic_on_open {
            panic!("scripted panic opening {}", camera.camera_id);
        }
        if let Some(delay) = script.open_delay {
            tokio::time::sleep(delay).await;
        }
        if script.fail_opens > 0 {
            return Err(Error::source_unavailable(&camera.camera_id, "connection refused"));
        }

        Ok(Box::new(FakeSource {
            frame_interval: self.frame_interval,
            remaining: script.session_frames,
            stall_after: script.stall_after,
            read: 0,
            camera_id: camera.camera_id.clone(),
        }))
    }
}

/// Fake source producing a frame every `frame_interval`
pub struct FakeSource {
    frame_interval: Duration,
    remaining: Option<u64>,
    stall_after: Option<u64>,
    read: u64,
    camera_id: String,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        if self.stall_after.map_or(false, |n| self.read >= n) {
            std::future::pending::<()>().await;
        }
        if self.remaining == Some(0) {
            return Err(Error::source_unavailable(&self.camera_id, "stream ended"));
        }
        tokio::time::sleep(self.frame_interval).await;
        self.read += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Bytes::from_static(FAKE_JPEG))
    }
}

/// Perception returning a settable point set
pub struct FixedPerception {
    points: Mutex<Option<PointSet>>,
    calls: AtomicU64,
}

impl FixedPerception {
    pub fn new(points: Option<PointSet>) -> Self {
        Self {
            points: Mutex::new(points),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_points(&self, points: Option<PointSet>) {
        *self.points.lock() = points;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerceptionEngine for FixedPerception {
    async fn extract(&self, _camera_id: &str, _frame: &Frame) -> Result<Option<PointSet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.points.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::{Metric, PostureSnapshot};

    #[test]
    fn test_knee_points_produce_requested_angle() {
        for degrees in [40.0, 90.0, 95.0, 170.0] {
            let snapshot = PostureSnapshot::from_points(knee_points(degrees));
            let angle = snapshot.get(Metric::LeftKnee).unwrap();
            assert!((angle - degrees).abs() < 1e-6, "{} vs {}", angle, degrees);
        }
    }
}
