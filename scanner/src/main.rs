use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use scan_gate_common::config::{CameraConfig, Config};
use scan_gate_common::frame::FrameGeometry;
use scan_gate_scanner::capture::FrameCapturer;
use scan_gate_scanner::client::RecognitionClient;
use scan_gate_scanner::controller::ScanController;
use scan_gate_scanner::overlay::{OverlayRenderer, ScanContext};
use scan_gate_scanner::source::mjpeg::MjpegCamera;
use scan_gate_scanner::source::{CameraDevice, SourceError, StreamSource};
use scan_gate_scanner::ui::ConsoleUi;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const HELP: &str = "commands: scan (or empty line) | webcam | alt <url> | status | quit";

/// A device for `camera.backend`, or a camera error when it is unknown or
/// not compiled in.
fn camera_device(config: &CameraConfig, connect_timeout: Duration) -> Result<Arc<dyn CameraDevice>, SourceError> {
    match config.backend.as_str() {
        "mjpeg" => Ok(Arc::new(MjpegCamera::new(config.url.clone(), connect_timeout))),
        #[cfg(feature = "native-camera")]
        "native" => Ok(Arc::new(scan_gate_scanner::source::native::NativeCamera::new(config.index))),
        other => Err(SourceError::CameraAccess(format!(
            "camera backend '{other}' is not available in this build"
        ))),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        service = config.service.base_url,
        backend = config.camera.backend,
        width = config.camera.width,
        height = config.camera.height,
        "starting scan-gate scanner"
    );

    let connect_timeout = Duration::from_secs(config.service.connect_timeout_secs);
    let device = match camera_device(&config.camera, connect_timeout) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "no usable camera backend");
            std::process::exit(1);
        }
    };

    let client = match RecognitionClient::new(&config.service.base_url, connect_timeout) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            std::process::exit(1);
        }
    };
    match client.service_online().await {
        Ok(true) => info!("recognition service online"),
        Ok(false) => warn!("recognition service reports it is not online"),
        Err(e) => warn!(error = %e, "recognition service status unavailable"),
    }

    let ctx = ScanContext::new();
    let source = StreamSource::new(
        device,
        FrameGeometry::new(config.camera.width, config.camera.height),
        ctx.clone(),
    );
    let renderer = OverlayRenderer::new(ctx.clone(), Duration::from_millis(config.overlay.expiry_ms));
    let mut controller = ScanController::new(
        source,
        FrameCapturer::new(config.capture.jpeg_quality)
            .with_max_frame_age(Duration::from_millis(config.capture.max_frame_age_ms)),
        client,
        renderer,
        ctx.clone(),
        ConsoleUi::new(std::io::stdout()),
    )
    .with_snapshot_dir(config.overlay.snapshot_dir.as_ref().map(PathBuf::from));

    if let Err(e) = controller.init().await {
        warn!(error = %e, "camera not started; use 'webcam' to retry");
    }
    println!("{HELP}");
    controller.ui_mut().show(&ctx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read command");
                break;
            }
        };
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" | "scan" | "s" => {
                controller.scan().await;
            }
            "webcam" | "w" => {
                let _ = controller.select_webcam().await;
            }
            "alt" | "esp32" => {
                let _ = controller.select_alternate(arg).await;
            }
            "status" => {}
            "quit" | "q" | "exit" => break,
            _ => println!("{HELP}"),
        }
        controller.ui_mut().show(&ctx);
    }

    info!("scanner shutting down");
}
