use std::time::Duration;

use image::RgbImage;
use livefeed_common::detection::Detection;
use livefeed_common::frame::encode_jpeg;
use serde::Deserialize;
use tracing::debug;

use super::{AnnotateError, Detector};

const REQUEST_JPEG_QUALITY: u8 = 90;

/// Client for an HTTP inference service.
///
/// Each call POSTs the frame as `image/jpeg` and expects either a bare JSON
/// array of detections or `{"detections": [...]}`, each entry shaped as
/// `{"label", "confidence", "box": {"x", "y", "width", "height"}}`.
pub struct RemoteDetector {
    agent: ureq::Agent,
    endpoint: String,
    min_confidence: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    Bare(Vec<Detection>),
    Wrapped { detections: Vec<Detection> },
}

impl RemoteDetector {
    pub fn new(endpoint: String, timeout: Duration, min_confidence: f32) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint,
            min_confidence,
        }
    }

    fn parse(&self, body: &str) -> Result<Vec<Detection>, AnnotateError> {
        let response: DetectResponse =
            serde_json::from_str(body).map_err(|e| AnnotateError::Response(e.to_string()))?;
        let detections = match response {
            DetectResponse::Bare(d) | DetectResponse::Wrapped { detections: d } => d,
        };
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .collect())
    }
}

impl Detector for RemoteDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, AnnotateError> {
        let jpeg = encode_jpeg(image, REQUEST_JPEG_QUALITY)
            .map_err(|e| AnnotateError::Encode(e.to_string()))?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .map_err(|e| AnnotateError::Request(e.to_string()))?;
        let body = response
            .into_string()
            .map_err(|e| AnnotateError::Response(e.to_string()))?;
        let detections = self.parse(&body)?;
        debug!(count = detections.len(), bytes = jpeg.len(), "remote inference complete");
        Ok(detections)
    }

    fn name(&self) -> &str {
        "remote"
    }
}
