//! ffmpeg MJPEG source
//!
//! ffmpeg decodes whatever the camera speaks and writes a continuous MJPEG
//! stream to stdout; `MjpegSplitter` cuts it into individual JPEG frames.

use super::{FrameSource, SourceConnector};
use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}

/// Splits a byte stream into JPEG frames on SOI/EOI markers
#[derive(Debug)]
pub struct MjpegSplitter {
    buffer: BytesMut,
    max_frame_size: usize,
    dropped_bytes: u64,
}

impl MjpegSplitter {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_frame_size,
            dropped_bytes: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes discarded as garbage or oversized partial frames
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let Some(start) = find_marker(&self.buffer, SOI, 0) else {
                // Keep a trailing 0xFF, it may be the first half of an SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let discard = self.buffer.len() - keep;
                self.discard(discard);
                return None;
            };
            if start > 0 {
                self.discard(start);
            }

            let oversized = match find_marker(&self.buffer, EOI, 2) {
                Some(end) if end + 2 <= self.max_frame_size => {
                    return Some(self.buffer.split_to(end + 2).freeze());
                }
                Some(_) => true,
                None => self.buffer.len() > self.max_frame_size,
            };
            if !oversized {
                return None;
            }
            // Oversized or truncated frame: resync on the next SOI
            let next = find_marker(&self.buffer, SOI, 2).unwrap_or(self.buffer.len());
            self.discard(next);
        }
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            let _ = self.buffer.split_to(count);
            self.dropped_bytes += count as u64;
        }
    }
}

/// Spawns ffmpeg per camera
#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    ffmpeg_path: String,
    open_timeout: Duration,
    max_frame_size: usize,
    /// Output frame rate cap (None keeps the source rate)
    frame_rate: Option<u32>,
}

impl FfmpegConnector {
    pub fn new(ffmpeg_path: impl Into<String>, open_timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            open_timeout,
            max_frame_size: 8 * 1024 * 1024,
            frame_rate: None,
        }
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// ffmpeg arguments for a source locator
    pub fn build_args(&self, source_url: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if source_url.starts_with("rtsp://") || source_url.starts_with("rtsps://") {
            args.extend(["-rtsp_transport", "tcp"].map(String::from));
        } else if !source_url.contains("://") {
            // Local file: pace reads at native rate
            args.push("-re".to_string());
        }
        args.extend(["-i", source_url, "-an"].map(String::from));
        if let Some(fps) = self.frame_rate {
            args.extend(["-r".to_string(), fps.to_string()]);
        }
        args.extend(
            [
                "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5", "-loglevel", "error", "-",
            ]
            .map(String::from),
        );
        args
    }
}

#[async_trait]
impl SourceConnector for FfmpegConnector {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.build_args(&camera.source_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::source_unavailable(&camera.camera_id, format!("ffmpeg spawn failed: {}", e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::source_unavailable(&camera.camera_id, "ffmpeg stdout not captured")
        })?;

        let mut source = FfmpegSource {
            camera_id: camera.camera_id.clone(),
            _child: child,
            stdout,
            splitter: MjpegSplitter::new(self.max_frame_size),
            pending: None,
        };

        // The source counts as open once the first frame arrives
        match tokio::time::timeout(self.open_timeout, source.next_from_stream()).await {
            Ok(Ok(first)) => {
                source.pending = Some(first);
                tracing::debug!(camera_id = %camera.camera_id, "ffmpeg source opened");
                Ok(Box::new(source))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::source_unavailable(
                &camera.camera_id,
                format!("no frame within {}ms", self.open_timeout.as_millis()),
            )),
        }
    }
}

/// Running ffmpeg process (killed on drop)
pub struct FfmpegSource {
    camera_id: String,
    _child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    pending: Option<Bytes>,
}

impl FfmpegSource {
    async fn next_from_stream(&mut self) -> Result<Bytes> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(frame);
            }
            let n = self.stdout.read(&mut chunk).await.map_err(|e| {
                Error::source_unavailable(&self.camera_id, format!("read failed: {}", e))
            })?;
            if n == 0 {
                return Err(Error::source_unavailable(&self.camera_id, "stream ended"));
            }
            self.splitter.push(&chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.next_from_stream().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&EOI);
        out
    }

    #[test]
    fn test_splits_concatenated_frames() {
        let mut splitter = MjpegSplitter::new(1024);
        let mut stream = jpeg(b"one");
        stream.extend(jpeg(b"two"));
        splitter.push(&stream);

        assert_eq!(splitter.next_frame().unwrap().as_ref(), jpeg(b"one").as_slice());
        assert_eq!(splitter.next_frame().unwrap().as_ref(), jpeg(b"two").as_slice());
        assert!(splitter.next_frame().is_none());
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_frame_split_across_pushes() {
        let mut splitter = MjpegSplitter::new(1024);
        let frame = jpeg(b"payload");
        let (a, b) = frame.split_at(4);

        splitter.push(a);
        assert!(splitter.next_frame().is_none());
        splitter.push(b);
        assert_eq!(splitter.next_frame().unwrap().as_ref(), frame.as_slice());
    }

    #[test]
    fn test_marker_split_across_pushes() {
        let mut splitter = MjpegSplitter::new(1024);
        splitter.push(b"junk\xFF");
        assert!(splitter.next_frame().is_none());
        splitter.push(b"\xD8abc\xFF\xD9");
        assert_eq!(splitter.next_frame().unwrap().as_ref(), b"\xFF\xD8abc\xFF\xD9");
        assert_eq!(splitter.dropped_bytes(), 4);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut splitter = MjpegSplitter::new(16);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(&[0u8; 32]);
        stream.extend(jpeg(b"ok"));
        splitter.push(&stream);

        assert_eq!(splitter.next_frame().unwrap().as_ref(), jpeg(b"ok").as_slice());
        assert_eq!(splitter.dropped_bytes(), 34);
    }

    #[test]
    fn test_build_args_per_locator() {
        let connector = FfmpegConnector::new("ffmpeg", Duration::from_secs(5));

        let rtsp = connector.build_args("rtsp://10.0.0.5/stream1");
        assert_eq!(&rtsp[..2], &["-rtsp_transport", "tcp"]);
        assert_eq!(rtsp.last().map(String::as_str), Some("-"));

        let file = connector.build_args("/videos/line1.mp4");
        assert_eq!(file[0], "-re");

        let http = connector.with_frame_rate(10).build_args("http://cam/video");
        assert_eq!(http[0], "-i");
        assert!(http.windows(2).any(|w| w[0] == "-r" && w[1] == "10"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_source_unavailable() {
        let connector = FfmpegConnector::new("/nonexistent/ffmpeg-binary", Duration::from_secs(1));
        let camera = CameraConfig::new("cam-001", "rtsp://10.0.0.5/stream1");

        let err = match connector.open(&camera).await {
            Ok(_) => panic!("open should fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), "source_unavailable");
    }
}
