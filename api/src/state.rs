use std::sync::Arc;

use livefeed_common::config::Config;
use livefeed_pipeline::annotate::Detector;
use livefeed_pipeline::controller::StreamController;
use livefeed_pipeline::query::DetectionQuery;
use livefeed_pipeline::stream::EncoderSettings;

use crate::users::UserRegistry;

/// Shared state behind every handler.
pub struct AppState {
    pub controller: StreamController,
    pub detections: DetectionQuery,
    /// Same detector the capture loop annotates with, used for uploads.
    pub detector: Arc<dyn Detector>,
    pub encoder: EncoderSettings,
    pub users: UserRegistry,
}

impl AppState {
    pub fn new(controller: StreamController, detector: Arc<dyn Detector>, config: &Config) -> Self {
        let detections = DetectionQuery::new(Arc::clone(controller.shared()));
        Self {
            controller,
            detections,
            detector,
            encoder: EncoderSettings::from(&config.stream),
            users: UserRegistry::from_config(&config.users),
        }
    }
}
