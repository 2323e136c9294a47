//! Overlay - Posture annotation on JPEG frames
//!
//! Draws each measured metric's limb segments and joint, coloured by that
//! metric's current alert level, plus a status bar coloured by the worst
//! level. CPU bound; callers run it on the blocking pool.

use crate::alert_state::AlertLevel;
use crate::error::Result;
use crate::frame_buffer::Frame;
use crate::perception::Point;
use crate::posture::{Metric, PostureSnapshot};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::collections::BTreeMap;

const COLOR_NORMAL: Rgb<u8> = Rgb([50, 205, 50]);
const COLOR_WARNING: Rgb<u8> = Rgb([255, 165, 0]);
const COLOR_CRITICAL: Rgb<u8> = Rgb([220, 20, 60]);

/// Drawing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub joint_radius: i32,
    /// Status bar height in pixels (0 disables it)
    pub status_bar_height: u32,
    pub jpeg_quality: u8,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            joint_radius: 5,
            status_bar_height: 8,
            jpeg_quality: 80,
        }
    }
}

pub fn level_color(level: AlertLevel) -> Rgb<u8> {
    match level {
        AlertLevel::Normal => COLOR_NORMAL,
        AlertLevel::Warning => COLOR_WARNING,
        AlertLevel::Critical => COLOR_CRITICAL,
    }
}

fn to_pixels(point: Point, width: u32, height: u32) -> (f32, f32) {
    (
        (point.x.clamp(0.0, 1.0) * f64::from(width.saturating_sub(1))) as f32,
        (point.y.clamp(0.0, 1.0) * f64::from(height.saturating_sub(1))) as f32,
    )
}

/// Render the posture overlay and re-encode as JPEG
pub fn render_overlay(
    frame: &Frame,
    snapshot: &PostureSnapshot,
    levels: &BTreeMap<Metric, AlertLevel>,
    style: &OverlayStyle,
) -> Result<Frame> {
    let mut canvas: RgbImage = image::load_from_memory(&frame.data)?.to_rgb8();
    let (width, height) = canvas.dimensions();

    let mut worst = AlertLevel::Normal;
    for metric in snapshot.measurements().keys() {
        let Some(segments) = snapshot.segments(*metric) else {
            continue;
        };
        let level = levels.get(metric).copied().unwrap_or(AlertLevel::Normal);
        worst = worst.max(level);
        let color = level_color(level);

        for (start, end) in segments {
            draw_line_segment_mut(
                &mut canvas,
                to_pixels(start, width, height),
                to_pixels(end, width, height),
                color,
            );
        }

        let (jx, jy) = to_pixels(segments[0].1, width, height);
        draw_filled_circle_mut(&mut canvas, (jx as i32, jy as i32), style.joint_radius, color);
    }

    if style.status_bar_height > 0 && width > 0 {
        let bar_height = style.status_bar_height.min(height).max(1);
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(0, 0).of_size(width, bar_height),
            level_color(worst),
        );
    }

    let mut encoded = Vec::with_capacity(frame.data.len());
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, style.jpeg_quality);
    encoder.encode_image(&canvas)?;

    Ok(Frame {
        data: Bytes::from(encoded),
        captured_at: frame.captured_at,
        sequence: frame.sequence,
        annotated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::{Landmark, PointSet};

    fn jpeg(width: u32, height: u32) -> Bytes {
        let image = RgbImage::from_pixel(width, height, Rgb([20, 20, 20]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&image)
            .unwrap();
        Bytes::from(out)
    }

    fn knee_snapshot() -> PostureSnapshot {
        PostureSnapshot::from_points(
            PointSet::new()
                .with(Landmark::LeftHip, Point::new(0.5, 0.3))
                .with(Landmark::LeftKnee, Point::new(0.5, 0.6))
                .with(Landmark::LeftAnkle, Point::new(0.8, 0.6)),
        )
    }

    #[test]
    fn test_overlay_keeps_dimensions_and_metadata() {
        let frame = Frame::new(jpeg(64, 48), 7);
        let levels = BTreeMap::from([(Metric::LeftKnee, AlertLevel::Critical)]);

        let rendered =
            render_overlay(&frame, &knee_snapshot(), &levels, &OverlayStyle::default()).unwrap();

        assert!(rendered.annotated);
        assert_eq!(rendered.sequence, 7);
        assert_eq!(rendered.captured_at, frame.captured_at);
        let decoded = image::load_from_memory(&rendered.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_overlay_rejects_non_image_payload() {
        let frame = Frame::new(Bytes::from_static(b"not a jpeg"), 1);
        let result = render_overlay(
            &frame,
            &knee_snapshot(),
            &BTreeMap::new(),
            &OverlayStyle::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_level_colors_are_distinct() {
        assert_ne!(level_color(AlertLevel::Normal), level_color(AlertLevel::Warning));
        assert_ne!(level_color(AlertLevel::Warning), level_color(AlertLevel::Critical));
    }
}
