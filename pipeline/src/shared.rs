//! Hand-off point between the capture loop and its readers.
//!
//! The current frame and its detections live behind one `ArcSwap` pointer,
//! so a reader always gets a matched pair by cloning an `Arc` and never
//! holds anything the writer waits on. Publishers take a mutex only around
//! the version bump and pointer swap.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use livefeed_common::detection::DetectionRecord;
use livefeed_common::frame::Frame;
use tokio::sync::watch;
use tracing::trace;

/// One published (frame, detections) pair.
#[derive(Debug)]
pub struct Snapshot {
    pub frame: Arc<Frame>,
    pub detections: Arc<[DetectionRecord]>,
    /// 0 for the placeholder, then 1, 2, ... per publish.
    pub version: u64,
}

pub struct SharedFrameState {
    current: ArcSwap<Snapshot>,
    publish_lock: Mutex<()>,
    versions: watch::Sender<u64>,
}

impl SharedFrameState {
    /// Start out with a black `width`x`height` placeholder and no detections.
    pub fn new(width: u32, height: u32) -> Self {
        let (versions, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                frame: Arc::new(Frame::placeholder(width, height)),
                detections: Arc::from(Vec::new()),
                version: 0,
            }),
            publish_lock: Mutex::new(()),
            versions,
        }
    }

    /// Replace the current pair and return its version.
    pub fn publish(&self, frame: Frame, detections: Vec<DetectionRecord>) -> u64 {
        let frame = Arc::new(frame);
        let detections: Arc<[DetectionRecord]> = Arc::from(detections);

        let guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());
        let version = self.current.load().version + 1;
        let seq = frame.seq;
        self.current.store(Arc::new(Snapshot {
            frame,
            detections,
            version,
        }));
        drop(guard);

        self.versions.send_replace(version);
        trace!(version, seq, "frame published");
        version
    }

    /// Latest published pair. Never torn, never blocks the publisher.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Receiver notified on every publish, for consumers that wait for a
    /// newer frame instead of polling.
    pub fn watch_versions(&self) -> watch::Receiver<u64> {
        self.versions.subscribe()
    }
}
