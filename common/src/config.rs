use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

/// Which frame source backs the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    /// Local V4L2 device `/dev/video<device_index>` (requires the `v4l` feature).
    V4l,
    /// Remote MJPEG-over-HTTP source at `camera.url`.
    Mjpeg,
    /// Generated test pattern.
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: CameraBackendKind,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Frame rate of the synthetic source.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Consecutive failed reads before the device is treated as lost.
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
    /// Per-read timeout for network sources.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Process only every Nth captured frame.
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
    /// Lower bound on the gap between two parts sent to one client.
    #[serde(default = "default_min_frame_interval_ms")]
    pub min_frame_interval_ms: u64,
    /// Re-send the latest frame after this long without a new one.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Inference service URL. Without one, frames pass through unannotated.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device_index: 0,
            url: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            max_read_failures: default_max_read_failures(),
            read_retry_ms: default_read_retry_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_skip: default_frame_skip(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_quality(),
            min_frame_interval_ms: default_min_frame_interval_ms(),
            keepalive_ms: default_keepalive_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_detector_timeout_ms(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
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
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "stream.jpeg_quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            )));
        }
        if self.camera.backend == CameraBackendKind::Mjpeg && self.camera.url.is_none() {
            return Err(ConfigError::Invalid(
                "camera.backend = \"mjpeg\" requires camera.url".into(),
            ));
        }
        if self.camera.backend == CameraBackendKind::Synthetic && self.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "camera.fps must be positive, got {}",
                self.camera.fps
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector.min_confidence must be within [0, 1], got {}",
                self.detector.min_confidence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_backend() -> CameraBackendKind {
    CameraBackendKind::V4l
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> f64 {
    30.0
}
fn default_max_read_failures() -> u32 {
    50
}
fn default_read_retry_ms() -> u64 {
    10
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_frame_skip() -> u32 {
    2
}
fn default_quality() -> u8 {
    80
}
fn default_min_frame_interval_ms() -> u64 {
    33
}
fn default_keepalive_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_ms() -> u64 {
    2000
}
fn default_detector_timeout_ms() -> u64 {
    2000
}
fn default_min_confidence() -> f32 {
    0.25
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".into()
}
