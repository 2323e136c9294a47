//! FrameSource - Camera stream adapters
//!
//! ## Responsibilities
//!
//! - `SourceConnector`: open a camera's source, bounded-time reachability probe
//! - `FrameSource`: sequential encoded-frame reads from one open source
//! - ffmpeg-backed MJPEG implementation (RTSP, HTTP, files)

mod ffmpeg;

pub use ffmpeg::{FfmpegConnector, FfmpegSource, MjpegSplitter};

use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// One open camera stream, exclusively owned by its worker
#[async_trait]
pub trait FrameSource: Send {
    /// Next encoded frame. Any error means the source is unusable.
    async fn read_frame(&mut self) -> Result<Bytes>;
}

/// Opens frame sources for cameras
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>>;

    /// Open and read a single frame within `timeout`
    async fn probe(&self, camera: &CameraConfig, timeout: Duration) -> Result<()> {
        let attempt = async {
            let mut source = self.open(camera).await?;
            source.read_frame().await.map(|_| ())
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::source_unavailable(
                camera.camera_id.clone(),
                format!("probe timed out after {}ms", timeout.as_millis()),
            )),
        }
    }
}
