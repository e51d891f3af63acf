use std::path::PathBuf;

use scan_gate_common::frame::FrameGeometry;
use scan_gate_common::verdict::ScanVerdict;
use tracing::{info, warn};

use crate::capture::{CaptureError, FrameCapturer};
use crate::client::RecognitionClient;
use crate::overlay::{raster, OverlayRenderer, ScanContext};
use crate::source::{SourceError, StreamSource};
use crate::ui::ScannerUi;

pub const SCAN_LABEL: &str = "Scan Face";
pub const SCANNING_LABEL: &str = "Scanning...";
pub const NO_STREAM_ALERT: &str = "Camera is not active. Please start the webcam first.";
pub const ALTERNATE_UNSUPPORTED_ALERT: &str =
    "ESP32 stream integration is not supported yet. Falling back to the webcam.";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Wires source, capturer, client and renderer to the UI.
pub struct ScanController<U: ScannerUi> {
    source: StreamSource,
    capturer: FrameCapturer,
    client: RecognitionClient,
    renderer: OverlayRenderer,
    ctx: ScanContext,
    ui: U,
    state: ScanState,
    snapshot_dir: Option<PathBuf>,
}

impl<U: ScannerUi> ScanController<U> {
    pub fn new(
        source: StreamSource,
        capturer: FrameCapturer,
        client: RecognitionClient,
        renderer: OverlayRenderer,
        ctx: ScanContext,
        mut ui: U,
    ) -> Self {
        ui.set_trigger(false, SCAN_LABEL);
        Self {
            source,
            capturer,
            client,
            renderer,
            ctx,
            ui,
            state: ScanState::Idle,
            snapshot_dir: None,
        }
    }

    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn context(&self) -> &ScanContext {
        &self.ctx
    }

    /// Start the local camera. Called once at startup.
    pub async fn init(&mut self) -> Result<FrameGeometry, ScanError> {
        self.select_webcam().await
    }

    pub async fn select_webcam(&mut self) -> Result<FrameGeometry, ScanError> {
        self.ctx.set_status("Starting camera...");
        let result = self.source.select_webcam().await;
        self.apply_selection(result)
    }

    /// A blank URL is alerted and leaves the current source untouched.
    pub async fn select_alternate(&mut self, url: &str) -> Result<FrameGeometry, ScanError> {
        if let Err(e) = StreamSource::validate_alternate_url(url) {
            self.ui.alert(&e.to_string());
            return Err(e.into());
        }
        self.ui.alert(ALTERNATE_UNSUPPORTED_ALERT);
        self.ctx.set_status("Starting camera...");
        let result = self.source.select_alternate(url).await;
        self.apply_selection(result)
    }

    fn apply_selection(
        &mut self,
        result: Result<FrameGeometry, SourceError>,
    ) -> Result<FrameGeometry, ScanError> {
        match result {
            Ok(geometry) => {
                self.ctx.set_status(format!("Camera active ({geometry})"));
                self.ui.set_trigger(true, SCAN_LABEL);
                Ok(geometry)
            }
            Err(e) => {
                warn!(error = %e, "source selection failed");
                self.ctx.set_status(e.to_string());
                self.ui.set_trigger(false, SCAN_LABEL);
                Err(e.into())
            }
        }
    }

    /// One scan cycle: capture, recognize, render. Returns the rendered
    /// verdict, or `None` when the cycle was rejected or aborted.
    pub async fn scan(&mut self) -> Option<ScanVerdict> {
        if self.state == ScanState::Scanning {
            return None;
        }
        if !self.source.is_active() {
            self.ui.alert(NO_STREAM_ALERT);
            return None;
        }

        self.state = ScanState::Scanning;
        self.ui.set_trigger(false, SCANNING_LABEL);
        self.ctx.set_status(SCANNING_LABEL);

        let outcome = self.run_cycle().await;

        // Runs on every exit path of the cycle.
        self.state = ScanState::Idle;
        self.ui.set_trigger(self.source.is_active(), SCAN_LABEL);

        match outcome {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                warn!(error = %e, "scan aborted");
                self.ctx.set_status(e.to_string());
                self.ui.alert(&e.to_string());
                None
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<ScanVerdict, ScanError> {
        let (frame, surface) = self.capturer.capture(&self.source)?;
        let verdict = self.client.recognize(&frame).await;
        self.renderer.render(&verdict, frame.geometry());

        if let (Some(dir), Some(_)) = (&self.snapshot_dir, verdict.face_box) {
            let canvas = self.ctx.canvas().clone();
            let (dir, record) = (dir.clone(), verdict.clone());
            let captured_at_ms = frame.captured_at_ms();
            let written = tokio::task::spawn_blocking(move || {
                raster::try_save_snapshot(&dir, &surface, &canvas, &record, captured_at_ms);
            })
            .await;
            if let Err(e) = written {
                warn!(error = %e, "snapshot task failed");
            }
        }
        info!(status = %verdict.status, "scan complete");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{MockService, Reply};
    use crate::overlay::{DrawCommand, NO_FACE_NOTICE, SUCCESS_COLOR};
    use crate::source::testing::FakeCamera;
    use crate::source::CameraDevice;
    use axum::http::StatusCode;
    use scan_gate_common::verdict::{FaceBox, VerdictStatus};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingUi {
        triggers: Vec<(bool, String)>,
        alerts: Vec<String>,
    }

    impl RecordingUi {
        fn trigger(&self) -> (bool, &str) {
            let (enabled, label) = self.triggers.last().unwrap();
            (*enabled, label)
        }
    }

    impl ScannerUi for RecordingUi {
        fn set_trigger(&mut self, enabled: bool, label: &str) {
            self.triggers.push((enabled, label.to_string()));
        }

        fn alert(&mut self, message: &str) {
            self.alerts.push(message.to_string());
        }
    }

    fn controller(camera: Arc<FakeCamera>, base_url: &str) -> ScanController<RecordingUi> {
        let ctx = ScanContext::new();
        let device: Arc<dyn CameraDevice> = camera;
        ScanController::new(
            StreamSource::new(device, FrameGeometry::new(640, 480), ctx.clone()),
            FrameCapturer::new(0.9).with_max_frame_age(Duration::from_secs(2)),
            RecognitionClient::new(base_url, Duration::from_secs(2)).unwrap(),
            OverlayRenderer::new(ctx.clone(), Duration::from_secs(3)),
            ctx,
            RecordingUi::default(),
        )
    }

    #[tokio::test]
    async fn allowed_scan_draws_overlay_and_restores_trigger() {
        let svc = MockService::start(Reply::Json(serde_json::json!({
            "status": "ALLOWED",
            "face_coords": [50, 60, 100, 120],
            "name": "Jane Doe"
        })))
        .await;
        let mut c = controller(Arc::new(FakeCamera::new(640, 480)), &svc.base_url);
        c.init().await.unwrap();
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));

        let verdict = c.scan().await.unwrap();
        assert_eq!(verdict.status, VerdictStatus::Allowed);
        assert_eq!(c.state(), ScanState::Idle);

        let labels: Vec<_> = c.ui().triggers.iter().rev().take(2).cloned().collect();
        assert_eq!(labels[1], (false, SCANNING_LABEL.to_string()));
        assert_eq!(labels[0], (true, SCAN_LABEL.to_string()));

        let canvas = c.context().canvas().clone();
        assert!(canvas.commands().contains(&DrawCommand::StrokeRect {
            rect: FaceBox::new(50.0, 60.0, 100.0, 120.0),
            color: SUCCESS_COLOR,
            width: 3.0,
        }));
        assert!(svc
            .last_image()
            .is_some_and(|img| img.starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test]
    async fn server_error_renders_message_and_reenables_trigger() {
        let svc =
            MockService::start(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR, "boom")).await;
        let mut c = controller(Arc::new(FakeCamera::new(640, 480)), &svc.base_url);
        c.init().await.unwrap();

        let verdict = c.scan().await.unwrap();
        assert_eq!(verdict.status, VerdictStatus::Error);
        assert!(c.context().canvas().is_blank());
        assert!(c.context().status_text().contains("500"));
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));
        assert!(c.ui().alerts.is_empty());
    }

    #[tokio::test]
    async fn no_face_shows_notice() {
        let svc = MockService::start(Reply::Json(serde_json::json!({"status": "UNKNOWN"}))).await;
        let mut c = controller(Arc::new(FakeCamera::new(640, 480)), &svc.base_url);
        c.init().await.unwrap();
        c.scan().await.unwrap();
        assert!(c.context().canvas().is_blank());
        assert_eq!(c.context().status_text(), NO_FACE_NOTICE);
    }

    #[tokio::test]
    async fn scan_without_stream_is_rejected_before_network() {
        let svc = MockService::start(Reply::Json(serde_json::json!({"status": "ALLOWED"}))).await;
        let mut c = controller(Arc::new(FakeCamera::new(640, 480)), &svc.base_url);

        assert!(c.scan().await.is_none());
        assert_eq!(c.ui().alerts, vec![NO_STREAM_ALERT.to_string()]);
        assert_eq!(c.state(), ScanState::Idle);
        assert_eq!(svc.hits(), 0);
    }

    #[tokio::test]
    async fn camera_denied_disables_scanning_and_reports_verbatim() {
        let camera = Arc::new(FakeCamera::denying("Permission denied"));
        let mut c = controller(camera.clone(), "http://127.0.0.1:9");
        assert!(matches!(c.init().await, Err(ScanError::Source(_))));
        assert_eq!(c.ui().trigger(), (false, SCAN_LABEL));
        assert_eq!(c.context().status_text(), "Permission denied");

        // Retrying once access is granted recovers.
        camera.set_failure(None);
        c.select_webcam().await.unwrap();
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));
    }

    #[tokio::test]
    async fn empty_alternate_url_alerts_without_touching_stream() {
        let camera = Arc::new(FakeCamera::new(640, 480));
        let mut c = controller(camera.clone(), "http://127.0.0.1:9");
        c.init().await.unwrap();

        assert!(c.select_alternate("").await.is_err());
        assert_eq!(c.ui().alerts.len(), 1);
        assert_eq!(camera.opens(), 1);
        assert_eq!(camera.stop_flags(), vec![false]);
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));
    }

    #[tokio::test]
    async fn alternate_url_alerts_then_falls_back() {
        let camera = Arc::new(FakeCamera::new(640, 480));
        let mut c = controller(camera.clone(), "http://127.0.0.1:9");
        c.init().await.unwrap();

        c.select_alternate("http://192.168.4.1:81/stream")
            .await
            .unwrap();
        assert_eq!(c.ui().alerts, vec![ALTERNATE_UNSUPPORTED_ALERT.to_string()]);
        assert_eq!(camera.opens(), 2);
        assert_eq!(camera.stop_flags(), vec![true, false]);
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));
    }

    #[tokio::test]
    async fn snapshot_written_for_face_verdicts() {
        let svc = MockService::start(Reply::Json(serde_json::json!({
            "status": "DENIED",
            "face_coords": [10, 60, 40, 40],
            "name": "Sam"
        })))
        .await;
        let dir = std::env::temp_dir().join(format!("scan-gate-ctl-{}", std::process::id()));
        let mut c = controller(Arc::new(FakeCamera::new(160, 120)), &svc.base_url)
            .with_snapshot_dir(Some(dir.clone()));
        c.init().await.unwrap();
        c.scan().await.unwrap();

        let mut written: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        written.sort();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(written[1], written[0].with_extension("txt"));

        let report = std::fs::read_to_string(&written[1]).unwrap();
        assert!(report.contains("Status: DENIED: UNPAID (DENIED)"));
        assert!(report.contains("Name: Sam"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn no_snapshot_without_face() {
        let svc = MockService::start(Reply::Json(serde_json::json!({"status": "UNKNOWN"}))).await;
        let dir = std::env::temp_dir().join(format!("scan-gate-ctl-noface-{}", std::process::id()));
        let mut c = controller(Arc::new(FakeCamera::new(160, 120)), &svc.base_url)
            .with_snapshot_dir(Some(dir.clone()));
        c.init().await.unwrap();
        c.scan().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_camera_aborts_scan_before_network() {
        let svc = MockService::start(Reply::Json(serde_json::json!({"status": "ALLOWED"}))).await;
        let mut c = controller(Arc::new(FakeCamera::new(640, 480)), &svc.base_url);
        c.init().await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(c.scan().await.is_none());
        assert_eq!(svc.hits(), 0);
        assert_eq!(c.state(), ScanState::Idle);
        assert_eq!(c.ui().trigger(), (true, SCAN_LABEL));
        assert!(c.ui().alerts[0].starts_with("camera feed stalled"));
        assert!(c.context().status_text().starts_with("camera feed stalled"));
    }
}
