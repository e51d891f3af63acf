use std::time::Duration;

use scan_gate_common::frame::CapturedFrame;
use scan_gate_common::verdict::{RecognizeRequest, RecognizeResponse, ScanVerdict, ServiceStatus};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("could not reach recognition service: {0}")]
    Transport(reqwest::Error),
    #[error("recognition service returned HTTP {0}")]
    Service(String),
    #[error("malformed response from recognition service: {0}")]
    MalformedResponse(String),
}

/// HTTP client for the remote verdict endpoint.
pub struct RecognitionClient {
    client: reqwest::Client,
    base_url: String,
}

impl RecognitionClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, RecognitionError> {
        // No overall request timeout: a hung request waits on the transport.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(RecognitionError::Transport)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// One request/response cycle. Every failure comes back as an ERROR
    /// verdict; nothing is retried.
    pub async fn recognize(&self, frame: &CapturedFrame) -> ScanVerdict {
        match self.try_recognize(frame).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "recognition failed");
                ScanVerdict::error(e.to_string())
            }
        }
    }

    async fn try_recognize(&self, frame: &CapturedFrame) -> Result<ScanVerdict, RecognitionError> {
        let body = RecognizeRequest {
            image_base64: frame.to_data_url(),
        };
        debug!(
            bytes = frame.jpeg_data().len(),
            geometry = %frame.geometry(),
            "submitting frame for recognition"
        );

        let response = self
            .client
            .post(self.endpoint("/api/recognize"))
            .json(&body)
            .send()
            .await
            .map_err(RecognitionError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Service(status.to_string()));
        }

        let bytes = response.bytes().await.map_err(RecognitionError::Transport)?;
        let wire: RecognizeResponse = serde_json::from_slice(&bytes)
            .map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;
        let verdict = wire
            .into_verdict()
            .map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;

        info!(
            status = %verdict.status,
            name = verdict.display_name(),
            student_id = verdict.student_id.as_deref().unwrap_or("-"),
            confidence = verdict.confidence.unwrap_or_default(),
            "verdict received"
        );
        Ok(verdict)
    }

    /// Health probe against `/api/status`; true when the service says it is online.
    pub async fn service_online(&self) -> Result<bool, RecognitionError> {
        let response = self
            .client
            .get(self.endpoint("/api/status"))
            .send()
            .await
            .map_err(RecognitionError::Transport)?;
        if !response.status().is_success() {
            return Err(RecognitionError::Service(response.status().to_string()));
        }
        let status: ServiceStatus = response
            .json()
            .await
            .map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;
        debug!(status = status.status, students = status.total_students, "service status");
        Ok(status.status == "online")
    }
}
