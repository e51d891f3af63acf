//! Verdict visualisation: a retained canvas aligned with the video plus a
//! text panel for messages that have no face to point at.

pub mod raster;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::Rgba;
use scan_gate_common::frame::FrameGeometry;
use scan_gate_common::verdict::{FaceBox, ScanVerdict, VerdictStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const SUCCESS_COLOR: Rgba<u8> = Rgba([0x00, 0xFF, 0x00, 0xFF]);
pub const ALERT_COLOR: Rgba<u8> = Rgba([0xFF, 0x00, 0x00, 0xFF]);
pub const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xFF]);
pub const STROKE_WIDTH: f32 = 3.0;
pub const FONT_SIZE: f32 = 16.0;
pub const LINE_HEIGHT: f32 = 18.0;
pub const LABEL_PADDING: f32 = 5.0;

pub const NO_FACE_NOTICE: &str = "No face was detected in the scan.";

/// Status line drawn above the face box.
pub fn status_line(status: &VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::Allowed => "ACCESS GRANTED",
        VerdictStatus::Denied => "DENIED: UNPAID",
        VerdictStatus::Unknown => "UNKNOWN PERSON",
        VerdictStatus::Error | VerdictStatus::Unrecognized(_) => "ACCESS DENIED",
    }
}

pub fn status_color(status: &VerdictStatus) -> Rgba<u8> {
    match status {
        VerdictStatus::Allowed => SUCCESS_COLOR,
        _ => ALERT_COLOR,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    StrokeRect {
        rect: FaceBox,
        color: Rgba<u8>,
        width: f32,
    },
    FillRect {
        rect: FaceBox,
        color: Rgba<u8>,
    },
    /// `y` is the text baseline.
    FillText {
        text: String,
        x: f32,
        y: f32,
        color: Rgba<u8>,
    },
}

/// Display list sized to the video's native resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayCanvas {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl OverlayCanvas {
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    /// Resizing wipes the canvas, as with an HTML canvas.
    pub fn resize(&mut self, geometry: FrameGeometry) {
        self.width = geometry.width;
        self.height = geometry.height;
        self.commands.clear();
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn is_blank(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn stroke_rect(&mut self, rect: FaceBox, color: Rgba<u8>, width: f32) {
        self.commands.push(DrawCommand::StrokeRect { rect, color, width });
    }

    pub fn fill_rect(&mut self, rect: FaceBox, color: Rgba<u8>) {
        self.commands.push(DrawCommand::FillRect { rect, color });
    }

    pub fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }

    /// Width estimate for the label font.
    pub fn measure_text(&self, text: &str) -> f32 {
        text.chars().count() as f32 * FONT_SIZE * 0.6
    }
}

/// Status/result panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPanel {
    text: String,
}

impl TextPanel {
    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Handles to the drawing surfaces, shared by the components that touch them.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    canvas: Arc<Mutex<OverlayCanvas>>,
    panel: Arc<Mutex<TextPanel>>,
}

impl ScanContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canvas(&self) -> MutexGuard<'_, OverlayCanvas> {
        self.canvas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn panel(&self) -> MutexGuard<'_, TextPanel> {
        self.panel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resize_canvas(&self, geometry: FrameGeometry) {
        self.canvas().resize(geometry);
    }

    pub fn canvas_geometry(&self) -> FrameGeometry {
        self.canvas().geometry()
    }

    pub fn set_status(&self, text: impl Into<String>) {
        self.panel().set(text);
    }

    pub fn status_text(&self) -> String {
        self.panel().text().to_string()
    }
}

/// Draws verdicts and schedules their expiry.
pub struct OverlayRenderer {
    ctx: ScanContext,
    expiry: Duration,
    pending_expiry: Option<JoinHandle<()>>,
}

impl OverlayRenderer {
    pub fn new(ctx: ScanContext, expiry: Duration) -> Self {
        Self {
            ctx,
            expiry,
            pending_expiry: None,
        }
    }

    /// Replace whatever is drawn with `verdict`, then clear the canvas after
    /// the expiry delay. A newer render cancels the older expiry.
    pub fn render(&mut self, verdict: &ScanVerdict, geometry: FrameGeometry) {
        {
            let mut canvas = self.ctx.canvas();
            canvas.clear();
            self.ctx.panel().clear();

            match verdict.face_box {
                Some(face) => draw_face(&mut canvas, verdict, face, geometry),
                None => {
                    let text = match verdict.status {
                        VerdictStatus::Error => verdict.error_message(),
                        _ => NO_FACE_NOTICE,
                    };
                    self.ctx.panel().set(text);
                }
            }
        }

        info!(
            status = %verdict.status,
            name = verdict.display_name(),
            face = verdict.face_box.is_some(),
            "verdict rendered"
        );
        self.schedule_expiry();
    }

    fn schedule_expiry(&mut self) {
        if let Some(previous) = self.pending_expiry.take() {
            previous.abort();
        }
        let ctx = self.ctx.clone();
        let expiry = self.expiry;
        self.pending_expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            ctx.canvas().clear();
            debug!("overlay expired");
        }));
    }
}

impl Drop for OverlayRenderer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_expiry.take() {
            pending.abort();
        }
    }
}

fn draw_face(canvas: &mut OverlayCanvas, verdict: &ScanVerdict, face: FaceBox, geometry: FrameGeometry) {
    let color = status_color(&verdict.status);
    let status = status_line(&verdict.status);
    let name = verdict.display_name();

    canvas.stroke_rect(face, color, STROKE_WIDTH);

    let text_width = canvas.measure_text(status).max(canvas.measure_text(name));
    let label_height = LINE_HEIGHT * 2.0 + 4.0;
    let label_y = (face.y - label_height).max(0.0);
    let label_width = text_width + LABEL_PADDING * 2.0;
    // Keep the label on screen when the box hugs the right edge.
    let label_x = if geometry.is_empty() {
        face.x
    } else {
        face.x.min(geometry.width as f32 - label_width).max(0.0)
    };
    canvas.fill_rect(FaceBox::new(label_x, label_y, label_width, label_height), color);

    let text_x = label_x + LABEL_PADDING;
    canvas.fill_text(status, text_x, label_y + LINE_HEIGHT, LABEL_TEXT_COLOR);
    canvas.fill_text(name, text_x, label_y + LINE_HEIGHT * 2.0, LABEL_TEXT_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(status: VerdictStatus, face: Option<FaceBox>, name: Option<&str>) -> ScanVerdict {
        ScanVerdict {
            status,
            face_box: face,
            name: name.map(str::to_string),
            message: None,
            student_id: None,
            confidence: None,
        }
    }

    fn renderer() -> (OverlayRenderer, ScanContext) {
        let ctx = ScanContext::new();
        ctx.resize_canvas(FrameGeometry::new(640, 480));
        (OverlayRenderer::new(ctx.clone(), Duration::from_secs(3)), ctx)
    }

    fn texts(canvas: &OverlayCanvas) -> Vec<String> {
        canvas
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::FillText { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn stroke(canvas: &OverlayCanvas) -> Option<(FaceBox, Rgba<u8>)> {
        canvas.commands().iter().find_map(|c| match c {
            DrawCommand::StrokeRect { rect, color, .. } => Some((*rect, *color)),
            _ => None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn allowed_face_draws_green_box_and_label() {
        let (mut r, ctx) = renderer();
        let face = FaceBox::new(50.0, 60.0, 100.0, 120.0);
        r.render(
            &verdict(VerdictStatus::Allowed, Some(face), Some("Jane Doe")),
            FrameGeometry::new(640, 480),
        );

        let canvas = ctx.canvas().clone();
        assert_eq!(stroke(&canvas), Some((face, SUCCESS_COLOR)));
        assert_eq!(texts(&canvas), vec!["ACCESS GRANTED", "Jane Doe"]);
        assert_eq!(ctx.status_text(), "");

        // Label sits above the box and fits the wider line.
        let label = canvas.commands().iter().find_map(|c| match c {
            DrawCommand::FillRect { rect, .. } => Some(*rect),
            _ => None,
        });
        let label = label.unwrap();
        assert_eq!(label.x, 50.0);
        assert!(label.y + label.height <= 60.0);
        assert!(label.width >= canvas.measure_text("ACCESS GRANTED"));
    }

    #[tokio::test(start_paused = true)]
    async fn denial_statuses_use_alert_color() {
        let face = FaceBox::new(10.0, 100.0, 50.0, 50.0);
        for (status, line) in [
            (VerdictStatus::Denied, "DENIED: UNPAID"),
            (VerdictStatus::Unknown, "UNKNOWN PERSON"),
            (VerdictStatus::Unrecognized("SUSPENDED".into()), "ACCESS DENIED"),
            (VerdictStatus::Error, "ACCESS DENIED"),
        ] {
            let (mut r, ctx) = renderer();
            r.render(&verdict(status, Some(face), None), FrameGeometry::new(640, 480));
            let canvas = ctx.canvas().clone();
            assert_eq!(stroke(&canvas).map(|(_, c)| c), Some(ALERT_COLOR));
            assert_eq!(texts(&canvas), vec![line, "Unknown"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_face_renders_text_only() {
        let (mut r, ctx) = renderer();
        r.render(&verdict(VerdictStatus::Unknown, None, None), FrameGeometry::new(640, 480));
        assert!(ctx.canvas().is_blank());
        assert_eq!(ctx.status_text(), NO_FACE_NOTICE);

        r.render(&ScanVerdict::error("HTTP 500"), FrameGeometry::new(640, 480));
        assert!(ctx.canvas().is_blank());
        assert_eq!(ctx.status_text(), "HTTP 500");
    }

    #[tokio::test(start_paused = true)]
    async fn render_is_not_cumulative() {
        let (mut r, ctx) = renderer();
        let v = verdict(
            VerdictStatus::Allowed,
            Some(FaceBox::new(50.0, 60.0, 100.0, 120.0)),
            Some("Jane Doe"),
        );
        r.render(&v, FrameGeometry::new(640, 480));
        let first = ctx.canvas().clone();
        r.render(&v, FrameGeometry::new(640, 480));
        assert_eq!(*ctx.canvas(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn face_branch_clears_previous_panel_text() {
        let (mut r, ctx) = renderer();
        ctx.set_status("Scanning...");
        r.render(
            &verdict(VerdictStatus::Denied, Some(FaceBox::new(5.0, 5.0, 20.0, 20.0)), None),
            FrameGeometry::new(640, 480),
        );
        assert_eq!(ctx.status_text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn label_clamped_at_top_edge() {
        let (mut r, ctx) = renderer();
        r.render(
            &verdict(VerdictStatus::Allowed, Some(FaceBox::new(600.0, 2.0, 30.0, 30.0)), None),
            FrameGeometry::new(640, 480),
        );
        let canvas = ctx.canvas().clone();
        let label = canvas
            .commands()
            .iter()
            .find_map(|c| match c {
                DrawCommand::FillRect { rect, .. } => Some(*rect),
                _ => None,
            })
            .unwrap();
        assert_eq!(label.y, 0.0);
        assert!(label.x + label.width <= 640.0 + 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn canvas_clears_after_expiry() {
        let (mut r, ctx) = renderer();
        r.render(
            &verdict(VerdictStatus::Allowed, Some(FaceBox::new(1.0, 50.0, 2.0, 2.0)), None),
            FrameGeometry::new(640, 480),
        );
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(!ctx.canvas().is_blank());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ctx.canvas().is_blank());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_render_cancels_older_expiry() {
        let (mut r, ctx) = renderer();
        let v = verdict(VerdictStatus::Allowed, Some(FaceBox::new(1.0, 50.0, 2.0, 2.0)), None);
        r.render(&v, FrameGeometry::new(640, 480));
        tokio::time::sleep(Duration::from_secs(2)).await;
        r.render(&v, FrameGeometry::new(640, 480));

        // The first render's deadline passes without clearing the second.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctx.canvas().is_blank());
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(ctx.canvas().is_blank());
    }
}
