use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use scan_gate_common::frame::FrameGeometry;
use tracing::{debug, error, info, warn};

use super::{CameraDevice, FrameFeed, MediaStream, SourceError, VideoFrame};

/// Boundary assumed when the response does not declare one.
pub const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` JPEG streams.
pub struct MjpegParser {
    buffer: BytesMut,
    boundary: Vec<u8>,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY)
    }
}

impl MjpegParser {
    /// `boundary` is the value from the `Content-Type` header, without the
    /// leading dashes.
    pub fn new(boundary: &str) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            boundary: format!("--{boundary}\r\n").into_bytes(),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one network chunk; returns every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let boundary_len = self.boundary.len();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        // Skip already-scanned bytes next time
                        self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + boundary_len);
                    if !jpeg.is_empty() {
                        frames.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }
}

/// Pull the multipart boundary out of a `Content-Type` header value such as
/// `multipart/x-mixed-replace; boundary=boundarydonotcross`.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let value = value.strip_prefix("--").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Local camera exposed by a capture daemon as an MJPEG HTTP stream.
pub struct MjpegCamera {
    url: String,
    connect_timeout: Duration,
}

impl MjpegCamera {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

impl CameraDevice for MjpegCamera {
    fn name(&self) -> &str {
        "mjpeg"
    }

    fn open(&self, requested: FrameGeometry) -> Result<MediaStream, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| SourceError::CameraAccess(e.to_string()))?;

        let (mut stream, feed) = MediaStream::new(self.url.clone());
        let url = self.url.clone();
        let task = tokio::spawn(async move {
            run_reader(client, url, requested, feed).await;
        });
        stream.attach_task(task);
        Ok(stream)
    }
}

/// Read the stream until the consumer goes away. Before the first frame any
/// failure is reported as a camera error; afterwards the reader reconnects
/// with exponential backoff.
async fn run_reader(client: reqwest::Client, url: String, requested: FrameGeometry, feed: FrameFeed) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url, %requested, "connecting to MJPEG camera");
        match consume_stream(&client, &url, requested, &feed).await {
            Ok(()) if !feed.is_live() => {
                error!(url, "camera stream ended before the first frame");
                feed.fail("camera stream ended before the first frame");
                return;
            }
            Ok(()) => {
                info!(url, "camera stream ended, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) if !feed.is_live() => {
                error!(error = %e, url, "camera unavailable");
                feed.fail(e.to_string());
                return;
            }
            Err(e) => {
                warn!(error = %e, url, "camera stream error, reconnecting in {:?}", backoff);
            }
        }
        if feed.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

#[derive(Debug, thiserror::Error)]
enum ReaderError {
    #[error("HTTP connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    Stream(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
}

async fn consume_stream(
    client: &reqwest::Client,
    url: &str,
    requested: FrameGeometry,
    feed: &FrameFeed,
) -> Result<(), ReaderError> {
    let response = client
        .get(url)
        .query(&[("width", requested.width), ("height", requested.height)])
        .send()
        .await
        .map_err(ReaderError::Connect)?;

    if !response.status().is_success() {
        return Err(ReaderError::Status(response.status().as_u16()));
    }

    let boundary = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    info!(status = %response.status(), boundary = %boundary, "connected to MJPEG camera");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new(&boundary);
    let mut seq: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ReaderError::Stream)?;
        for jpeg in parser.push(&chunk) {
            match VideoFrame::from_jpeg(jpeg) {
                Some(frame) => {
                    seq += 1;
                    if seq % 100 == 0 {
                        debug!(seq, geometry = %frame.geometry(), "camera frames received");
                    }
                    feed.publish(frame);
                }
                None => warn!("undecodable JPEG header in camera stream, skipping"),
            }
        }
        if feed.is_closed() {
            break;
        }
    }

    Ok(())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
