//! Fixtures for handler tests: a scripted camera and a fixed detector
//! wired through the real capture pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use image::{Rgb, RgbImage};
use livefeed_common::config::Config;
use livefeed_common::detection::{BoundingBox, Detection};
use livefeed_pipeline::annotate::{AnnotateError, Detector, OverlayAnnotator};
use livefeed_pipeline::camera::{CameraBackend, CaptureDevice, CaptureError};
use livefeed_pipeline::capture::{CaptureLoop, CaptureSettings};
use livefeed_pipeline::controller::StreamController;
use livefeed_pipeline::shared::SharedFrameState;

use crate::routes;
use crate::state::AppState;

const FRAME_GAP: Duration = Duration::from_millis(2);

/// Serves solid frames, up to `limit` of them, then reports read failures.
pub struct ScriptedCamera {
    limit: Option<u64>,
    served: Arc<AtomicU64>,
}

impl ScriptedCamera {
    pub fn endless() -> Self {
        Self {
            limit: None,
            served: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn limited(frames: u64) -> Self {
        Self {
            limit: Some(frames),
            ..Self::endless()
        }
    }

    pub fn served(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.served)
    }
}

struct ScriptedDevice {
    limit: Option<u64>,
    served: Arc<AtomicU64>,
}

impl CameraBackend for ScriptedCamera {
    fn open(&self, _device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        Ok(Box::new(ScriptedDevice {
            limit: self.limit,
            served: Arc::clone(&self.served),
        }))
    }
}

impl CaptureDevice for ScriptedDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        std::thread::sleep(FRAME_GAP);
        let served = self.served.load(Ordering::SeqCst);
        if self.limit.is_some_and(|limit| served >= limit) {
            return Err(CaptureError::ReadFailed("script exhausted".into()));
        }
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::from_pixel(64, 48, Rgb([40, 90, 160])))
    }

    fn close(self: Box<Self>) {}
}

/// Always sees one person.
pub struct FixedDetector;

impl Detector for FixedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, AnnotateError> {
        Ok(vec![Detection {
            label: "person".into(),
            confidence: 0.91,
            bbox: BoundingBox {
                x: 2,
                y: 3,
                width: 10,
                height: 12,
            },
        }])
    }
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.camera.width = 32;
    config.camera.height = 24;
    config.camera.max_read_failures = u32::MAX;
    config.camera.read_retry_ms = 1;
    config.capture.frame_skip = 1;
    config.stream.min_frame_interval_ms = 1;
    config.stream.keepalive_ms = 50;
    config
}

pub fn app(camera: ScriptedCamera) -> (Router, Arc<AppState>) {
    wire(&config(), Arc::new(camera), Arc::new(FixedDetector))
}

/// Assemble the full stack the way the server binary does.
pub fn wire(
    config: &Config,
    camera: Arc<dyn CameraBackend>,
    detector: Arc<dyn Detector>,
) -> (Router, Arc<AppState>) {
    let shared = Arc::new(SharedFrameState::new(config.camera.width, config.camera.height));
    let capture = CaptureLoop::new(
        camera,
        Arc::new(OverlayAnnotator::new(Arc::clone(&detector))),
        Arc::clone(&shared),
        CaptureSettings::from_config(config),
    );
    let controller = StreamController::new(capture, shared);
    let state = Arc::new(AppState::new(controller, detector, config));
    (routes::router(Arc::clone(&state), config), state)
}
