//! Annotated scan snapshots.
//!
//! Composites the overlay's rectangles onto the scanned frame with tiny-skia.
//! Text commands are not rasterized; the label background marks where they sit,
//! and a text report with the verdict is written next to each image.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{Rgba, RgbImage, RgbaImage};
use scan_gate_common::verdict::ScanVerdict;
use tiny_skia::{Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};
use tracing::{debug, warn};

use super::{status_line, DrawCommand, OverlayCanvas};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("frame of {0}x{1} cannot back a drawing surface")]
    Surface(u32, u32),
    #[error("failed to write snapshot {0}: {1}")]
    Write(String, image::ImageError),
    #[error("failed to create snapshot directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write scan report {0}: {1}")]
    Report(String, std::io::Error),
}

fn paint_for(color: Rgba<u8>) -> Paint<'static> {
    let [r, g, b, a] = color.0;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = true;
    paint
}

/// Draw `canvas` over `frame` and return the composited image.
pub fn composite(frame: &RgbImage, canvas: &OverlayCanvas) -> Result<RgbaImage, SnapshotError> {
    let (w, h) = frame.dimensions();
    let mut img = image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    let size = tiny_skia::IntSize::from_wh(w, h).ok_or(SnapshotError::Surface(w, h))?;
    let mut pixmap =
        Pixmap::from_vec(img.as_raw().clone(), size).ok_or(SnapshotError::Surface(w, h))?;

    for command in canvas.commands() {
        match command {
            DrawCommand::StrokeRect { rect, color, width } => {
                let Some(r) = Rect::from_xywh(rect.x, rect.y, rect.width, rect.height) else {
                    continue;
                };
                let path = PathBuilder::from_rect(r);
                let stroke = Stroke {
                    width: *width,
                    ..Default::default()
                };
                pixmap.stroke_path(&path, &paint_for(*color), &stroke, Transform::identity(), None);
            }
            DrawCommand::FillRect { rect, color } => {
                if let Some(r) = Rect::from_xywh(rect.x, rect.y, rect.width, rect.height) {
                    pixmap.fill_rect(r, &paint_for(*color), Transform::identity(), None);
                }
            }
            DrawCommand::FillText { .. } => {}
        }
    }

    img.copy_from_slice(pixmap.data());
    Ok(img)
}

/// Plain-text summary of a verdict, stored beside its snapshot.
pub fn scan_report(verdict: &ScanVerdict, at: DateTime<Utc>) -> String {
    let mut report = format!(
        "Timestamp: {}\nStatus: {} ({})\nName: {}\n",
        at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
        status_line(&verdict.status),
        verdict.status,
        verdict.display_name(),
    );
    if let Some(id) = &verdict.student_id {
        report.push_str(&format!("Student ID: {id}\n"));
    }
    if let Some(confidence) = verdict.confidence {
        report.push_str(&format!("Confidence: {confidence:.1}%\n"));
    }
    report
}

/// Write a composited snapshot as `scan_<UTC timestamp>.png` under `dir`,
/// plus a `.txt` report of `verdict` with the same stem.
pub fn save_snapshot(
    dir: &Path,
    frame: &RgbImage,
    canvas: &OverlayCanvas,
    verdict: &ScanVerdict,
    captured_at_ms: i64,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SnapshotError::CreateDir(dir.display().to_string(), e))?;
    let img = composite(frame, canvas)?;

    let dt = DateTime::from_timestamp_millis(captured_at_ms).unwrap_or_else(Utc::now);
    let stem = format!("scan_{}", dt.format("%Y%m%dT%H%M%S%3fZ"));
    let path = dir.join(format!("{stem}.png"));
    img.save(&path)
        .map_err(|e| SnapshotError::Write(path.display().to_string(), e))?;

    let report_path = dir.join(format!("{stem}.txt"));
    std::fs::write(&report_path, scan_report(verdict, dt))
        .map_err(|e| SnapshotError::Report(report_path.display().to_string(), e))?;
    debug!(path = %path.display(), "snapshot written");
    Ok(path)
}

/// Best-effort variant used by the controller.
pub fn try_save_snapshot(
    dir: &Path,
    frame: &RgbImage,
    canvas: &OverlayCanvas,
    verdict: &ScanVerdict,
    captured_at_ms: i64,
) {
    if let Err(e) = save_snapshot(dir, frame, canvas, verdict, captured_at_ms) {
        warn!(error = %e, "failed to save scan snapshot");
    }
}
