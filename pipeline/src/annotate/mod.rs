//! Object detection and overlay rendering.
//!
//! The inference engine sits behind [`Detector`]; [`Annotator`] is what the
//! capture loop calls to turn a raw frame into an annotated frame plus its
//! detection records.

mod overlay;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use livefeed_common::config::DetectorConfig;
use livefeed_common::detection::{Detection, DetectionRecord};

pub use self::overlay::OverlayAnnotator;
pub use self::remote::RemoteDetector;

/// Opaque inference: image in, detections out.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, AnnotateError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Result of annotating one frame.
#[derive(Debug)]
pub struct Annotated {
    pub image: RgbImage,
    pub detections: Vec<DetectionRecord>,
}

pub trait Annotator: Send + Sync {
    fn annotate(&self, image: &RgbImage) -> Result<Annotated, AnnotateError>;
}

/// Detector used when no inference service is configured.
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, AnnotateError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("inference request failed: {0}")]
    Request(String),
    #[error("invalid inference response: {0}")]
    Response(String),
    #[error("failed to encode frame for inference: {0}")]
    Encode(String),
}

/// Build the detector selected in config.
pub fn detector_from_config(config: &DetectorConfig) -> Arc<dyn Detector> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(RemoteDetector::new(
            endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            config.min_confidence,
        )),
        None => Arc::new(NoopDetector),
    }
}
