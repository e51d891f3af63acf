use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Pixel dimensions of a video source or captured still.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A JPEG still taken from the live stream for one scan request.
///
/// Immutable once built; dropped after the recognition round trip.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    jpeg: Vec<u8>,
    geometry: FrameGeometry,
    captured_at_ms: i64,
}

impl CapturedFrame {
    pub fn new(jpeg: Vec<u8>, geometry: FrameGeometry, captured_at_ms: i64) -> Self {
        Self {
            jpeg,
            geometry,
            captured_at_ms,
        }
    }

    pub fn jpeg_data(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    /// Transport encoding expected by `/api/recognize`: a base64 JPEG data URL.
    pub fn to_data_url(&self) -> String {
        let mut url = String::with_capacity(DATA_URL_PREFIX.len() + self.jpeg.len() * 4 / 3 + 4);
        url.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&self.jpeg, &mut url);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_geometry() {
        assert!(FrameGeometry::new(0, 480).is_empty());
        assert!(FrameGeometry::new(640, 0).is_empty());
        assert!(!FrameGeometry::new(640, 480).is_empty());
        assert_eq!(FrameGeometry::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn data_url_has_jpeg_prefix() {
        let frame = CapturedFrame::new(vec![0xFF, 0xD8, 0xFF, 0xE0], FrameGeometry::new(2, 2), 0);
        assert_eq!(frame.to_data_url(), "data:image/jpeg;base64,/9j/4A==");
    }
}
