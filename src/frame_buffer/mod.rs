//! FrameBuffer - Latest-wins frame handoff
//!
//! ## Responsibilities
//!
//! - Hold at most one pending frame per camera
//! - `publish` overwrites and never blocks the producer
//! - `latest` is a non-consuming read (every reader sees the same frame)
//!
//! Each camera owns its own `watch` slot inside a sharded map, so publishing
//! for camera A never contends with readers of camera B.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

/// Encoded image (JPEG) plus capture metadata
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
    /// Per-worker frame counter at capture time
    pub sequence: u64,
    /// True when a posture overlay was drawn onto `data`
    pub annotated: bool,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
            sequence,
            annotated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameBufferStats {
    pub camera_count: usize,
    pub total_bytes: usize,
}

/// FrameBuffer instance
pub struct FrameBuffer {
    slots: DashMap<String, watch::Sender<Option<Frame>>>,
}

impl FrameBuffer {
    /// Create new FrameBuffer
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Publish a frame, replacing any unread one
    pub fn publish(&self, camera_id: &str, frame: Frame) {
        if let Some(slot) = self.slots.get(camera_id) {
            slot.send_replace(Some(frame));
            return;
        }
        self.slots
            .entry(camera_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(frame));
    }

    /// Most recently published frame, if any
    pub fn latest(&self, camera_id: &str) -> Option<Frame> {
        self.slots
            .get(camera_id)
            .and_then(|slot| slot.borrow().as_ref().cloned())
    }

    /// Subscribe to frame updates for a camera
    ///
    /// The receiver always observes the most recent frame; intermediate frames
    /// are skipped when the reader is slower than the producer.
    pub fn subscribe(&self, camera_id: &str) -> watch::Receiver<Option<Frame>> {
        self.slots
            .entry(camera_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drop the slot for a camera (stopped or dead)
    pub fn remove(&self, camera_id: &str) {
        if let Some((_, slot)) = self.slots.remove(camera_id) {
            slot.send_replace(None);
            tracing::debug!(camera_id = %camera_id, "Frame slot removed");
        }
    }

    /// Cameras that currently hold a frame
    pub fn camera_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| slot.value().borrow().is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn stats(&self) -> FrameBufferStats {
        let mut stats = FrameBufferStats::default();
        for slot in self.slots.iter() {
            if let Some(frame) = slot.value().borrow().as_ref() {
                stats.camera_count += 1;
                stats.total_bytes += frame.len();
            }
        }
        stats
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
