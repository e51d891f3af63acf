use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote recognition service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// "mjpeg" (local camera daemon over HTTP) or "native" (requires the
    /// `native-camera` feature).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// JPEG quality on a 0..1 scale.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: f32,
    /// Scans are refused when the newest camera frame is older than this.
    #[serde(default = "default_max_frame_age_ms")]
    pub max_frame_age_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
    /// When set, annotated frames are written here after each face verdict.
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_camera_url(),
            index: 0,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            max_frame_age_ms: default_max_frame_age_ms(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            expiry_ms: default_expiry_ms(),
            snapshot_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.service.base_url.trim().is_empty() {
            return Err(ConfigError::Parse("service.base_url must not be empty".into()));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_connect_timeout() -> u64 {
    10
}
fn default_backend() -> String {
    "mjpeg".into()
}
fn default_camera_url() -> String {
    "http://127.0.0.1:8081/stream".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_jpeg_quality() -> f32 {
    0.9
}
fn default_max_frame_age_ms() -> u64 {
    2000
}
fn default_expiry_ms() -> u64 {
    3000
}
fn default_log_level() -> String {
    "info".into()
}
