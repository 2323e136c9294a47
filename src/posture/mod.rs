//! Posture - Joint-angle geometry
//!
//! ## Responsibilities
//!
//! - Three-point angle computation
//! - Anchor definitions for every metric
//! - `PostureSnapshot`: typed, optional-field measurements for one frame

mod metric;

pub use metric::{Metric, MetricFamily};

use crate::perception::{Landmark, Point, PointSet};
use std::collections::BTreeMap;

/// Angle at `b` from ray b->a to ray b->c, in degrees within [0, 360)
pub fn three_point_angle(a: Point, b: Point, c: Point) -> f64 {
    let radians = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let degrees = radians.to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

/// One vertex of a metric's angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Point(Landmark),
    Midpoint(Landmark, Landmark),
}

impl Anchor {
    pub fn resolve(&self, points: &PointSet) -> Option<Point> {
        match *self {
            Anchor::Point(landmark) => points.get(landmark),
            Anchor::Midpoint(a, b) => points.midpoint(a, b),
        }
    }
}

/// The three anchors (a, vertex, c) of a metric
pub fn anchors(metric: Metric) -> [Anchor; 3] {
    use Anchor::{Midpoint, Point as P};
    use Landmark::*;

    let spine = Midpoint(LeftShoulder, RightShoulder);
    let head = Midpoint(LeftEar, RightEar);

    match metric {
        Metric::LeftKnee => [P(LeftHip), P(LeftKnee), P(LeftAnkle)],
        Metric::RightKnee => [P(RightHip), P(RightKnee), P(RightAnkle)],
        Metric::LeftHipSpine => [spine, P(LeftHip), P(LeftKnee)],
        Metric::RightHipSpine => [spine, P(RightHip), P(RightKnee)],
        Metric::LeftElbow => [P(LeftShoulder), P(LeftElbow), P(LeftWrist)],
        Metric::RightElbow => [P(RightShoulder), P(RightElbow), P(RightWrist)],
        Metric::LeftNeck => [P(LeftHip), P(LeftShoulder), head],
        Metric::RightNeck => [P(RightHip), P(RightShoulder), head],
    }
}

fn resolve_anchors(metric: Metric, points: &PointSet) -> Option<[Point; 3]> {
    let [a, b, c] = anchors(metric);
    Some([a.resolve(points)?, b.resolve(points)?, c.resolve(points)?])
}

/// Measurements for one analyzed frame
#[derive(Debug, Clone, Default)]
pub struct PostureSnapshot {
    measurements: BTreeMap<Metric, f64>,
    points: PointSet,
}

impl PostureSnapshot {
    /// Compute every metric whose anchors are all present
    pub fn from_points(points: PointSet) -> Self {
        let measurements = Metric::ALL
            .into_iter()
            .filter_map(|metric| {
                let [a, b, c] = resolve_anchors(metric, &points)?;
                Some((metric, three_point_angle(a, b, c)))
            })
            .collect();

        Self {
            measurements,
            points,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.measurements.get(&metric).copied()
    }

    pub fn measurements(&self) -> &BTreeMap<Metric, f64> {
        &self.measurements
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Limb segments (a-vertex, vertex-c) of a measured metric
    pub fn segments(&self, metric: Metric) -> Option<[(Point, Point); 2]> {
        self.measurements.get(&metric)?;
        let [a, b, c] = resolve_anchors(metric, &self.points)?;
        Some([(a, b), (b, c)])
    }
}
