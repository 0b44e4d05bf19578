//! Frame sources for the capture loop.
//!
//! A [`CameraBackend`] opens a device; the resulting [`CaptureDevice`] is
//! owned by exactly one capture loop until it is closed.

mod http;
mod synthetic;
#[cfg(feature = "v4l")]
mod v4l;

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use livefeed_common::config::{CameraBackendKind, CameraConfig};
use tracing::warn;

pub use self::http::HttpMjpegCamera;
pub use self::synthetic::SyntheticCamera;
#[cfg(feature = "v4l")]
pub use self::v4l::V4lCamera;

/// Opens capture devices by index.
pub trait CameraBackend: Send + Sync {
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// An open camera handle.
pub trait CaptureDevice: Send {
    /// Block until the next raw frame is available.
    fn read(&mut self) -> Result<RgbImage, CaptureError>;

    /// Release the device. Consumes the handle so it cannot be closed twice.
    fn close(self: Box<Self>);
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("camera lost after {failures} consecutive failed reads")]
    DeviceLost { failures: u32 },
}

/// Build the backend selected in config.
///
/// A backend that cannot be built here still comes back as a backend: its
/// `open` reports the reason, so only stream starts fail and the rest of
/// the server keeps running.
pub fn from_config(config: &CameraConfig) -> Arc<dyn CameraBackend> {
    match config.backend {
        CameraBackendKind::Synthetic => Arc::new(SyntheticCamera::new(
            config.width,
            config.height,
            config.fps,
        )),
        CameraBackendKind::Mjpeg => match &config.url {
            Some(url) => Arc::new(HttpMjpegCamera::new(
                url.clone(),
                Duration::from_millis(config.read_timeout_ms),
            )),
            None => Arc::new(UnavailableCamera::new("mjpeg", "no camera.url configured")),
        },
        #[cfg(feature = "v4l")]
        CameraBackendKind::V4l => Arc::new(V4lCamera::new(config.width, config.height)),
        #[cfg(not(feature = "v4l"))]
        CameraBackendKind::V4l => Arc::new(UnavailableCamera::new(
            "v4l",
            "built without the `v4l` feature",
        )),
    }
}

/// Stands in for a backend that could not be built.
pub struct UnavailableCamera {
    name: &'static str,
    reason: String,
}

impl UnavailableCamera {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(backend = name, reason = %reason, "camera backend unavailable, stream starts will fail");
        Self { name, reason }
    }
}

impl CameraBackend for UnavailableCamera {
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        Err(CaptureError::DeviceUnavailable {
            index: device_index,
            reason: self.reason.clone(),
        })
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Decode a JPEG buffer straight to RGB.
pub(crate) fn decode_jpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| CaptureError::Decode(e.to_string()))
}
