use std::sync::atomic::Ordering;
use std::sync::Arc;

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use scan_gate_common::frame::FrameGeometry;
use tracing::{error, info, warn};

use super::{CameraDevice, MediaStream, SourceError, VideoFrame};

const TARGET_FPS: u32 = 30;

/// Camera attached to this machine, opened through the platform API.
pub struct NativeCamera {
    index: u32,
}

impl NativeCamera {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

impl CameraDevice for NativeCamera {
    fn name(&self) -> &str {
        "native"
    }

    fn open(&self, requested: FrameGeometry) -> Result<MediaStream, SourceError> {
        let (stream, feed) = MediaStream::new(format!("camera-{}", self.index));
        let stop = stream.stop_signal();
        let index = self.index;

        // Platform camera handles are not Send; keep one on its own thread.
        std::thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || {
                let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                    CameraFormat::new(
                        Resolution::new(requested.width, requested.height),
                        FrameFormat::MJPEG,
                        TARGET_FPS,
                    ),
                ));
                let mut camera = match Camera::new(CameraIndex::Index(index), format) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(error = %e, index, "failed to open camera");
                        feed.fail(e.to_string());
                        return;
                    }
                };
                if let Err(e) = camera.open_stream() {
                    error!(error = %e, index, "failed to start camera stream");
                    feed.fail(e.to_string());
                    return;
                }
                let resolution = camera.resolution();
                info!(
                    index,
                    width = resolution.width(),
                    height = resolution.height(),
                    "camera stream opened"
                );

                while !stop.load(Ordering::Acquire) && !feed.is_closed() {
                    let decoded = camera
                        .frame()
                        .and_then(|buffer| buffer.decode_image::<RgbFormat>());
                    match decoded {
                        Ok(buf) => {
                            let (w, h) = (buf.width(), buf.height());
                            if let Some(img) = RgbImage::from_raw(w, h, buf.into_raw()) {
                                feed.publish(VideoFrame::Rgb(Arc::new(img)));
                            }
                        }
                        Err(e) if !feed.is_live() => {
                            feed.fail(e.to_string());
                            break;
                        }
                        Err(e) => warn!(error = %e, index, "dropped camera frame"),
                    }
                }

                if let Err(e) = camera.stop_stream() {
                    warn!(error = %e, index, "failed to stop camera stream");
                }
            })
            .map_err(|e| SourceError::CameraAccess(e.to_string()))?;

        Ok(stream)
    }
}
