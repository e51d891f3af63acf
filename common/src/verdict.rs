use serde::{Deserialize, Serialize};

/// Display label used when the service does not name the person.
pub const DEFAULT_NAME: &str = "Unknown";
/// Message used for ERROR verdicts that arrive without one.
pub const DEFAULT_ERROR_MESSAGE: &str = "Recognition service reported an error.";

/// Access decision returned by the recognition service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictStatus {
    Allowed,
    Denied,
    Unknown,
    Error,
    /// A status string outside the documented set, kept verbatim.
    Unrecognized(String),
}

impl VerdictStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ALLOWED" => Self::Allowed,
            "DENIED" => Self::Denied,
            "UNKNOWN" => Self::Unknown,
            "ERROR" => Self::Error,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Denied => "DENIED",
            Self::Unknown => "UNKNOWN",
            Self::Error => "ERROR",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face rectangle in the source frame's pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Result of one recognition request. Consumed once by the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanVerdict {
    pub status: VerdictStatus,
    pub face_box: Option<FaceBox>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub student_id: Option<String>,
    pub confidence: Option<f64>,
}

impl ScanVerdict {
    /// ERROR verdict synthesized on the client for transport or service failures.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Error,
            face_box: None,
            name: None,
            message: Some(message.into()),
            student_id: None,
            confidence: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    pub fn error_message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE)
    }
}

// ---------------------------------------------------------------------------
// Wire types for POST /api/recognize
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizeRequest {
    pub image_base64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizeResponse {
    pub status: String,
    #[serde(default)]
    pub face_coords: Option<Vec<f64>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Response from GET /api/status.
#[derive(Debug, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    #[serde(default)]
    pub total_students: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum VerdictError {
    #[error("face_coords must hold 4 values, got {0}")]
    FaceCoordsArity(usize),
}

impl RecognizeResponse {
    pub fn into_verdict(self) -> Result<ScanVerdict, VerdictError> {
        let face_box = match self.face_coords {
            None => None,
            Some(coords) => match coords.as_slice() {
                [x, y, w, h] => Some(FaceBox::new(*x as f32, *y as f32, *w as f32, *h as f32)),
                other => return Err(VerdictError::FaceCoordsArity(other.len())),
            },
        };
        Ok(ScanVerdict {
            status: VerdictStatus::parse(&self.status),
            face_box,
            name: self.name,
            message: self.message,
            student_id: self.student_id,
            confidence: self.confidence,
        })
    }
}
