//! Live video sources.
//!
//! A `CameraDevice` opens a `MediaStream`; the stream's latest frame lives in a
//! watch channel fed by a background reader (tokio task or capture thread).
//! `StreamSource` keeps at most one stream active and resizes the overlay
//! canvas to the stream's native geometry once the first frame arrives.

pub mod mjpeg;
#[cfg(feature = "native-camera")]
pub mod native;

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageReader, RgbImage};
use scan_gate_common::frame::FrameGeometry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::overlay::ScanContext;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Device or permission failure; the message is shown to the user as is.
    #[error("{0}")]
    CameraAccess(String),
    #[error("{0}")]
    InvalidInput(String),
}

/// One frame as delivered by a device.
#[derive(Debug, Clone)]
pub enum VideoFrame {
    /// Still-compressed MJPEG frame; geometry read from its header.
    Jpeg {
        data: Arc<Vec<u8>>,
        geometry: FrameGeometry,
    },
    Rgb(Arc<RgbImage>),
}

impl VideoFrame {
    /// Wrap a JPEG, reading only its header for the dimensions.
    pub fn from_jpeg(data: Vec<u8>) -> Option<Self> {
        let (width, height) = ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()?;
        Some(Self::Jpeg {
            data: Arc::new(data),
            geometry: FrameGeometry::new(width, height),
        })
    }

    pub fn geometry(&self) -> FrameGeometry {
        match self {
            Self::Jpeg { geometry, .. } => *geometry,
            Self::Rgb(img) => FrameGeometry::new(img.width(), img.height()),
        }
    }

    /// Decode to RGB pixels.
    pub fn to_rgb(&self) -> image::ImageResult<RgbImage> {
        match self {
            Self::Jpeg { data, .. } => {
                let img = ImageReader::new(Cursor::new(data.as_slice()))
                    .with_guessed_format()?
                    .decode()?;
                Ok(img.to_rgb8())
            }
            Self::Rgb(img) => Ok(img.as_ref().clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum FeedState {
    Pending,
    Live {
        frame: VideoFrame,
        received_at: Instant,
    },
    Failed(String),
}

/// Producer half of a stream: devices publish frames or a failure here.
pub struct FrameFeed {
    tx: watch::Sender<FeedState>,
}

impl FrameFeed {
    pub fn publish(&self, frame: VideoFrame) {
        self.tx.send_replace(FeedState::Live {
            frame,
            received_at: Instant::now(),
        });
    }

    /// Report an acquisition failure. Ignored once the stream is live; the
    /// last frame stays readable but ages, see `MediaStream::frame_age`.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|state| match state {
            FeedState::Pending => {
                *state = FeedState::Failed(reason);
                true
            }
            _ => false,
        });
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.tx.borrow(), FeedState::Live { .. })
    }

    /// True when the consuming stream has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open device stream: the "video element" the capturer reads from.
pub struct MediaStream {
    label: String,
    frames: watch::Receiver<FeedState>,
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl MediaStream {
    pub fn new(label: impl Into<String>) -> (Self, FrameFeed) {
        let (tx, rx) = watch::channel(FeedState::Pending);
        let stream = Self {
            label: label.into(),
            frames: rx,
            stopped: Arc::new(AtomicBool::new(false)),
            task: None,
        };
        (stream, FrameFeed { tx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind the reader task so `stop` can abort it.
    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Flag observed by thread-based readers.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Wait until the device delivers its first frame and return its geometry.
    pub async fn ready(&mut self) -> Result<FrameGeometry, SourceError> {
        let state = self
            .frames
            .wait_for(|s| !matches!(s, FeedState::Pending))
            .await
            .map_err(|_| SourceError::CameraAccess("stream ended before the first frame".into()))?;
        match &*state {
            FeedState::Live { frame, .. } => Ok(frame.geometry()),
            FeedState::Failed(reason) => Err(SourceError::CameraAccess(reason.clone())),
            FeedState::Pending => Err(SourceError::CameraAccess("stream not ready".into())),
        }
    }

    pub fn current_frame(&self) -> Option<VideoFrame> {
        match &*self.frames.borrow() {
            FeedState::Live { frame, .. } => Some(frame.clone()),
            _ => None,
        }
    }

    /// Time since the device last delivered a frame.
    pub fn frame_age(&self) -> Option<Duration> {
        match &*self.frames.borrow() {
            FeedState::Live { received_at, .. } => Some(received_at.elapsed()),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop all tracks. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!(label = self.label, "media stream stopped");
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A local camera backend.
pub trait CameraDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Start acquiring at (or near) `requested`. Failures may surface either
    /// here or later from `MediaStream::ready`.
    fn open(&self, requested: FrameGeometry) -> Result<MediaStream, SourceError>;
}

/// Owns the single active video input.
pub struct StreamSource {
    device: Arc<dyn CameraDevice>,
    requested: FrameGeometry,
    ctx: ScanContext,
    active: Option<MediaStream>,
    geometry: Option<FrameGeometry>,
}

impl StreamSource {
    pub fn new(device: Arc<dyn CameraDevice>, requested: FrameGeometry, ctx: ScanContext) -> Self {
        Self {
            device,
            requested,
            ctx,
            active: None,
            geometry: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|s| !s.is_stopped())
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    pub fn active_stream(&self) -> Option<&MediaStream> {
        self.active.as_ref().filter(|s| !s.is_stopped())
    }

    /// Switch to the local camera, stopping whatever was active first.
    pub async fn select_webcam(&mut self) -> Result<FrameGeometry, SourceError> {
        self.release();

        info!(
            device = self.device.name(),
            requested = %self.requested,
            "requesting camera"
        );
        let mut stream = self.device.open(self.requested)?;
        let geometry = stream.ready().await?;
        if geometry.is_empty() {
            return Err(SourceError::CameraAccess(format!(
                "camera reported empty geometry {geometry}"
            )));
        }

        self.ctx.resize_canvas(geometry);
        info!(label = stream.label(), %geometry, "camera active");
        self.active = Some(stream);
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Reject a blank alternate-source URL before anything else happens.
    pub fn validate_alternate_url(url: &str) -> Result<&str, SourceError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SourceError::InvalidInput(
                "Please enter the ESP32 stream URL.".into(),
            ));
        }
        Ok(url)
    }

    /// Alternate (ESP32) streams are not ingested yet; a valid URL falls back
    /// to the local camera.
    pub async fn select_alternate(&mut self, url: &str) -> Result<FrameGeometry, SourceError> {
        let url = Self::validate_alternate_url(url)?;
        warn!(url, "alternate stream ingestion unsupported, falling back to camera");
        self.select_webcam().await
    }

    fn release(&mut self) {
        if let Some(mut previous) = self.active.take() {
            previous.stop();
        }
        self.geometry = None;
    }
}
