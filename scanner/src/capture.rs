use std::time::Duration;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use scan_gate_common::frame::CapturedFrame;
use tracing::debug;

use crate::source::StreamSource;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no active video stream")]
    NoActiveStream,
    #[error("camera feed stalled: last frame is {}ms old", .0.as_millis())]
    StaleFrame(Duration),
    #[error("failed to decode camera frame: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode still: {0}")]
    Encode(image::ImageError),
}

/// Snapshots the live frame into a JPEG still.
pub struct FrameCapturer {
    quality: u8,
    max_frame_age: Option<Duration>,
}

impl FrameCapturer {
    /// `quality` is on a 0..1 scale.
    pub fn new(quality: f32) -> Self {
        let quality = (quality.clamp(0.0, 1.0) * 100.0).round() as u8;
        Self {
            quality: quality.max(1),
            max_frame_age: None,
        }
    }

    /// Refuse to capture a frame older than `max_age`, e.g. while the camera
    /// reader is reconnecting.
    pub fn with_max_frame_age(mut self, max_age: Duration) -> Self {
        self.max_frame_age = Some(max_age);
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Draw the current frame onto a surface of the source's native geometry
    /// and encode it. Returns the surface too, for snapshotting.
    pub fn capture(&self, source: &StreamSource) -> Result<(CapturedFrame, RgbImage), CaptureError> {
        let stream = source.active_stream().ok_or(CaptureError::NoActiveStream)?;
        let geometry = source
            .geometry()
            .filter(|g| !g.is_empty())
            .ok_or(CaptureError::NoActiveStream)?;
        let frame = stream.current_frame().ok_or(CaptureError::NoActiveStream)?;
        if let (Some(limit), Some(age)) = (self.max_frame_age, stream.frame_age()) {
            if age > limit {
                return Err(CaptureError::StaleFrame(age));
            }
        }

        let mut surface = frame.to_rgb().map_err(CaptureError::Decode)?;
        if surface.dimensions() != (geometry.width, geometry.height) {
            surface = imageops::resize(&surface, geometry.width, geometry.height, FilterType::Triangle);
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(&surface)
            .map_err(CaptureError::Encode)?;

        debug!(%geometry, bytes = jpeg.len(), quality = self.quality, "frame captured");
        Ok((CapturedFrame::new(jpeg, geometry, Utc::now().timestamp_millis()), surface))
    }
}
