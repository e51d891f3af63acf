use std::io::Write;

use crate::overlay::{DrawCommand, ScanContext};

/// Controls the controller drives directly: the scan trigger and alerts.
pub trait ScannerUi {
    fn set_trigger(&mut self, enabled: bool, label: &str);
    fn alert(&mut self, message: &str);
}

/// Terminal front end.
pub struct ConsoleUi<W: Write> {
    out: W,
    trigger_enabled: bool,
    trigger_label: String,
}

impl<W: Write> ConsoleUi<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            trigger_enabled: false,
            trigger_label: String::new(),
        }
    }

    /// Print the status panel and whatever is on the overlay canvas.
    pub fn show(&mut self, ctx: &ScanContext) {
        let state = if self.trigger_enabled { "ready" } else { "disabled" };
        let _ = writeln!(self.out, "[{}: {}]", self.trigger_label, state);

        let status = ctx.status_text();
        if !status.is_empty() {
            let _ = writeln!(self.out, "{status}");
        }

        let canvas = ctx.canvas();
        for command in canvas.commands() {
            let _ = match command {
                DrawCommand::StrokeRect { rect, color, .. } => writeln!(
                    self.out,
                    "  box ({}, {}, {}, {}) #{:02X}{:02X}{:02X}",
                    rect.x, rect.y, rect.width, rect.height, color.0[0], color.0[1], color.0[2]
                ),
                DrawCommand::FillText { text, .. } => writeln!(self.out, "  {text}"),
                DrawCommand::FillRect { .. } => Ok(()),
            };
        }
        let _ = self.out.flush();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ScannerUi for ConsoleUi<W> {
    fn set_trigger(&mut self, enabled: bool, label: &str) {
        self.trigger_enabled = enabled;
        self.trigger_label = label.to_string();
    }

    fn alert(&mut self, message: &str) {
        let _ = writeln!(self.out, "!! {message}");
        let _ = self.out.flush();
    }
}
