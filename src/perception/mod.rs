//! Perception - Body landmark extraction adapter
//!
//! ## Responsibilities
//!
//! - Typed landmark names and 2D points (normalized image coordinates)
//! - `PerceptionEngine` seam for the external pose model
//! - HTTP client for a remote pose service
//!
//! "No detection" is `Ok(None)`, never an error.

mod client;

pub use client::{HttpPerceptionClient, PerceptionClientConfig};

use crate::error::Result;
use crate::frame_buffer::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body landmarks used by the posture metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Landmark {
    Nose,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Landmark {
    pub const ALL: [Landmark; 15] = [
        Landmark::Nose,
        Landmark::LeftEar,
        Landmark::RightEar,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftElbow,
        Landmark::RightElbow,
        Landmark::LeftWrist,
        Landmark::RightWrist,
        Landmark::LeftHip,
        Landmark::RightHip,
        Landmark::LeftKnee,
        Landmark::RightKnee,
        Landmark::LeftAnkle,
        Landmark::RightAnkle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Landmark::Nose => "nose",
            Landmark::LeftEar => "left_ear",
            Landmark::RightEar => "right_ear",
            Landmark::LeftShoulder => "left_shoulder",
            Landmark::RightShoulder => "right_shoulder",
            Landmark::LeftElbow => "left_elbow",
            Landmark::RightElbow => "right_elbow",
            Landmark::LeftWrist => "left_wrist",
            Landmark::RightWrist => "right_wrist",
            Landmark::LeftHip => "left_hip",
            Landmark::RightHip => "right_hip",
            Landmark::LeftKnee => "left_knee",
            Landmark::RightKnee => "right_knee",
            Landmark::LeftAnkle => "left_ankle",
            Landmark::RightAnkle => "right_ankle",
        }
    }

    /// Index in the 33-point BlazePose topology
    pub fn index(&self) -> u8 {
        match self {
            Landmark::Nose => 0,
            Landmark::LeftEar => 7,
            Landmark::RightEar => 8,
            Landmark::LeftShoulder => 11,
            Landmark::RightShoulder => 12,
            Landmark::LeftElbow => 13,
            Landmark::RightElbow => 14,
            Landmark::LeftWrist => 15,
            Landmark::RightWrist => 16,
            Landmark::LeftHip => 23,
            Landmark::RightHip => 24,
            Landmark::LeftKnee => 25,
            Landmark::RightKnee => 26,
            Landmark::LeftAnkle => 27,
            Landmark::RightAnkle => 28,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.index() == index)
    }

    /// Parse `left_knee` or `LEFT_KNEE`
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.as_str() == normalized)
    }
}

/// Normalized image coordinate (0.0..=1.0 on both axes, y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Named point set returned by the perception engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointSet {
    points: BTreeMap<Landmark, Point>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, landmark: Landmark, point: Point) {
        self.points.insert(landmark, point);
    }

    pub fn with(mut self, landmark: Landmark, point: Point) -> Self {
        self.insert(landmark, point);
        self
    }

    pub fn get(&self, landmark: Landmark) -> Option<Point> {
        self.points.get(&landmark).copied()
    }

    /// Midpoint of two landmarks, when both are present
    pub fn midpoint(&self, a: Landmark, b: Landmark) -> Option<Point> {
        Some(self.get(a)?.midpoint(&self.get(b)?))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Landmark, &Point)> {
        self.points.iter()
    }
}

impl FromIterator<(Landmark, Point)> for PointSet {
    fn from_iter<I: IntoIterator<Item = (Landmark, Point)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// External pose/landmark extractor
#[async_trait]
pub trait PerceptionEngine: Send + Sync {
    /// Extract landmarks from one encoded frame. `Ok(None)` means no person.
    async fn extract(&self, camera_id: &str, frame: &Frame) -> Result<Option<PointSet>>;
}
