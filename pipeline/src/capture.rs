use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbImage;
use livefeed_common::config::Config;
use livefeed_common::frame::Frame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::annotate::Annotator;
use crate::camera::{CameraBackend, CaptureDevice, CaptureError};
use crate::shared::SharedFrameState;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    /// Annotate only every Nth captured frame; 0 and 1 mean every frame.
    pub frame_skip: u32,
    pub max_read_failures: u32,
    pub read_retry: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_index: config.camera.device_index,
            width: config.camera.width,
            height: config.camera.height,
            frame_skip: config.capture.frame_skip,
            max_read_failures: config.camera.max_read_failures,
            read_retry: Duration::from_millis(config.camera.read_retry_ms),
        }
    }

    /// Whether the `count`-th captured frame (1-based) gets annotated.
    /// With N = 2 that is frames 2, 4, 6, ...
    pub fn should_process(&self, count: u64) -> bool {
        self.frame_skip <= 1 || count % u64::from(self.frame_skip) == 0
    }
}

/// Counters reported when a loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub annotated: u64,
    pub dropped: u64,
}

/// The producer: capture, skip, annotate, publish, until cancelled.
pub struct CaptureLoop {
    backend: Arc<dyn CameraBackend>,
    annotator: Arc<dyn Annotator>,
    shared: Arc<SharedFrameState>,
    settings: CaptureSettings,
    /// Frame sequence shared by every run, so it keeps rising across restarts.
    next_seq: AtomicU64,
}

impl CaptureLoop {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        annotator: Arc<dyn Annotator>,
        shared: Arc<SharedFrameState>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            backend,
            annotator,
            shared,
            settings,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Run on the calling thread until `stop` is cancelled or the device fails.
    ///
    /// The device is opened on entry and closed exactly once on every exit
    /// path after a successful open.
    pub fn run(&self, stop: &CancellationToken) -> Result<CaptureStats, CaptureError> {
        let index = self.settings.device_index;
        let mut device = match self.backend.open(index) {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, backend = self.backend.name(), device_index = index, "failed to open camera");
                return Err(e);
            }
        };
        info!(backend = self.backend.name(), device_index = index, "camera opened, capture loop running");

        let result = self.capture_until_stopped(device.as_mut(), stop);
        device.close();

        match &result {
            Ok(stats) => info!(
                captured = stats.captured,
                annotated = stats.annotated,
                dropped = stats.dropped,
                "capture loop stopped, camera released"
            ),
            Err(e) => error!(error = %e, "capture loop aborted, camera released"),
        }
        result
    }

    fn capture_until_stopped(
        &self,
        device: &mut dyn CaptureDevice,
        stop: &CancellationToken,
    ) -> Result<CaptureStats, CaptureError> {
        let mut stats = CaptureStats::default();
        let mut failures: u32 = 0;

        while !stop.is_cancelled() {
            let raw = match device.read() {
                Ok(img) => {
                    failures = 0;
                    img
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_read_failures.max(1) {
                        return Err(CaptureError::DeviceLost { failures });
                    }
                    debug!(error = %e, failures, "frame read failed, retrying");
                    std::thread::sleep(self.settings.read_retry);
                    continue;
                }
            };

            stats.captured += 1;
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if !self.settings.should_process(stats.captured) {
                continue;
            }

            let image = self.normalize(raw);
            match self.annotator.annotate(&image) {
                Ok(annotated) => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let frame = Frame::new(seq, now_ms, annotated.image);
                    let count = annotated.detections.len();
                    let version = self.shared.publish(frame, annotated.detections);
                    stats.annotated += 1;
                    debug!(seq, version, detections = count, "frame annotated");
                }
                Err(e) => {
                    stats.dropped += 1;
                    warn!(error = %e, seq, "annotation failed, frame dropped");
                }
            }
        }

        Ok(stats)
    }

    fn normalize(&self, raw: RgbImage) -> RgbImage {
        let (w, h) = (self.settings.width, self.settings.height);
        if raw.dimensions() == (w, h) {
            raw
        } else {
            imageops::resize(&raw, w, h, FilterType::Triangle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{Annotated, AnnotateError};
    use livefeed_common::detection::DetectionRecord;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Yields `limit` frames, cancelling `stop` when handing out the last one.
    struct CountedCamera {
        limit: u64,
        stop: CancellationToken,
        closes: Arc<AtomicU32>,
        size: (u32, u32),
    }

    impl CameraBackend for CountedCamera {
        fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Ok(Box::new(CountedDevice {
                read: 0,
                limit: self.limit,
                stop: self.stop.clone(),
                closes: Arc::clone(&self.closes),
                size: self.size,
            }))
        }
    }

    struct CountedDevice {
        read: u64,
        limit: u64,
        stop: CancellationToken,
        closes: Arc<AtomicU32>,
        size: (u32, u32),
    }

    impl CaptureDevice for CountedDevice {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            self.read += 1;
            if self.read >= self.limit {
                self.stop.cancel();
            }
            Ok(RgbImage::new(self.size.0, self.size.1))
        }

        fn close(self: Box<Self>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Each opened device gets the next stop token in line.
    struct SequencedCamera {
        per_run: u64,
        stops: Mutex<VecDeque<CancellationToken>>,
    }

    impl CameraBackend for SequencedCamera {
        fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            let stop = self.stops.lock().unwrap().pop_front().expect("one token per run");
            Ok(Box::new(CountedDevice {
                read: 0,
                limit: self.per_run,
                stop,
                closes: Arc::new(AtomicU32::new(0)),
                size: (4, 4),
            }))
        }
    }

    struct BrokenCamera;

    impl CameraBackend for BrokenCamera {
        fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Err(CaptureError::DeviceUnavailable {
                index,
                reason: "no such device".into(),
            })
        }
    }

    struct FlakyCamera {
        closes: Arc<AtomicU32>,
    }

    impl CameraBackend for FlakyCamera {
        fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Ok(Box::new(FlakyDevice {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    struct FlakyDevice {
        closes: Arc<AtomicU32>,
    }

    impl CaptureDevice for FlakyDevice {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            Err(CaptureError::ReadFailed("select timeout".into()))
        }

        fn close(self: Box<Self>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts calls; fails on the call numbers listed in `fail_on`.
    #[derive(Default)]
    struct CountingAnnotator {
        calls: AtomicU64,
        fail_on: Vec<u64>,
    }

    impl Annotator for CountingAnnotator {
        fn annotate(&self, image: &RgbImage) -> Result<Annotated, AnnotateError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(AnnotateError::Response("model crashed".into()));
            }
            Ok(Annotated {
                image: image.clone(),
                detections: vec![DetectionRecord::new("person", 0.91)],
            })
        }
    }

    fn settings(frame_skip: u32) -> CaptureSettings {
        CaptureSettings {
            device_index: 0,
            width: 4,
            height: 4,
            frame_skip,
            max_read_failures: 5,
            read_retry: Duration::from_millis(1),
        }
    }

    fn counted(limit: u64, stop: &CancellationToken, size: (u32, u32)) -> (Arc<CountedCamera>, Arc<AtomicU32>) {
        let closes = Arc::new(AtomicU32::new(0));
        let camera = Arc::new(CountedCamera {
            limit,
            stop: stop.clone(),
            closes: Arc::clone(&closes),
            size,
        });
        (camera, closes)
    }

    #[test]
    fn skip_parity_is_every_second_frame() {
        let s = settings(2);
        let processed: Vec<u64> = (1..=10).filter(|n| s.should_process(*n)).collect();
        assert_eq!(processed, vec![2, 4, 6, 8, 10]);
        assert!((1..=5).all(|n| settings(1).should_process(n)));
        assert!((1..=5).all(|n| settings(0).should_process(n)));
    }

    #[test]
    fn ten_frames_with_skip_two_annotate_five() {
        let stop = CancellationToken::new();
        let (camera, closes) = counted(10, &stop, (4, 4));
        let annotator = Arc::new(CountingAnnotator::default());
        let shared = Arc::new(SharedFrameState::new(4, 4));
        let capture = CaptureLoop::new(camera, annotator.clone(), shared.clone(), settings(2));

        let stats = capture.run(&stop).unwrap();

        assert_eq!(stats, CaptureStats { captured: 10, annotated: 5, dropped: 0 });
        assert_eq!(annotator.calls.load(Ordering::SeqCst), 5);
        assert_eq!(shared.version(), 5);
        assert_eq!(shared.snapshot().frame.seq, 10);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequence_numbers_continue_across_runs() {
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let camera = Arc::new(SequencedCamera {
            per_run: 10,
            stops: Mutex::new(VecDeque::from([first.clone(), second.clone()])),
        });
        let shared = Arc::new(SharedFrameState::new(4, 4));
        let capture = CaptureLoop::new(
            camera,
            Arc::new(CountingAnnotator::default()),
            shared.clone(),
            settings(2),
        );

        capture.run(&first).unwrap();
        assert_eq!(shared.snapshot().frame.seq, 10);

        let stats = capture.run(&second).unwrap();
        assert_eq!(stats.captured, 10);
        let snap = shared.snapshot();
        assert_eq!(snap.version, 10);
        assert_eq!(snap.frame.seq, 20);
    }

    #[test]
    fn frames_are_resized_to_target() {
        let stop = CancellationToken::new();
        let (camera, _) = counted(1, &stop, (16, 12));
        let shared = Arc::new(SharedFrameState::new(4, 4));
        let capture = CaptureLoop::new(
            camera,
            Arc::new(CountingAnnotator::default()),
            shared.clone(),
            settings(1),
        );
        capture.run(&stop).unwrap();
        let snap = shared.snapshot();
        assert_eq!((snap.frame.width(), snap.frame.height()), (4, 4));
    }

    #[test]
    fn failed_annotation_keeps_previous_state() {
        let stop = CancellationToken::new();
        let (camera, _) = counted(3, &stop, (4, 4));
        let annotator = Arc::new(CountingAnnotator {
            fail_on: vec![3],
            ..Default::default()
        });
        let shared = Arc::new(SharedFrameState::new(4, 4));
        let capture = CaptureLoop::new(camera, annotator, shared.clone(), settings(1));

        let stats = capture.run(&stop).unwrap();

        assert_eq!(stats.dropped, 1);
        let snap = shared.snapshot();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.frame.seq, 2);
        assert_eq!(snap.detections.len(), 1);
    }

    #[test]
    fn open_failure_is_reported_and_nothing_published() {
        let shared = Arc::new(SharedFrameState::new(4, 4));
        let capture = CaptureLoop::new(
            Arc::new(BrokenCamera),
            Arc::new(CountingAnnotator::default()),
            shared.clone(),
            settings(2),
        );
        let err = capture.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable { index: 0, .. }));
        assert_eq!(shared.version(), 0);
    }

    #[test]
    fn persistent_read_failures_release_the_device() {
        let closes = Arc::new(AtomicU32::new(0));
        let capture = CaptureLoop::new(
            Arc::new(FlakyCamera { closes: closes.clone() }),
            Arc::new(CountingAnnotator::default()),
            Arc::new(SharedFrameState::new(4, 4)),
            settings(2),
        );
        let err = capture.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceLost { failures: 5 }));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_before_first_read_still_closes() {
        let stop = CancellationToken::new();
        stop.cancel();
        let (camera, closes) = counted(10, &stop, (4, 4));
        let capture = CaptureLoop::new(
            camera,
            Arc::new(CountingAnnotator::default()),
            Arc::new(SharedFrameState::new(4, 4)),
            settings(2),
        );
        let stats = capture.run(&stop).unwrap();
        assert_eq!(stats.captured, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
