//! Posture Camserver Library
//!
//! Concurrent multi-camera posture monitoring.
//!
//! ## Architecture
//!
//! 1. ConfigStore - Cached desired camera set from the datastore
//! 2. CameraManager - Reconciliation, probing, health checks
//! 3. StreamWorker - Per-camera read / sample / analyze loop
//! 4. FrameSource - ffmpeg MJPEG ingest
//! 5. Perception - Pose landmark extraction
//! 6. Posture - Joint angle measurement
//! 7. AlertState - Per-metric escalation with cooldown
//! 8. AlertAggregator - Active alerts, history, statistics
//! 9. AlertDispatcher - Persistence and notifier fan-out
//! 10. FrameBuffer - Latest annotated frame per camera
//!
//! ## Design Principles
//!
//! - One worker per camera, failures contained per camera
//! - Latest-wins frame slots, never a backlog
//! - Shared state behind per-entry locks

pub mod alert_aggregator;
pub mod alert_dispatch;
pub mod alert_state;
pub mod camera_manager;
pub mod camera_status;
pub mod config_store;
pub mod error;
pub mod frame_buffer;
pub mod frame_source;
pub mod notification;
pub mod overlay;
pub mod perception;
pub mod posture;
pub mod state;
pub mod stream_worker;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use state::AppState;
