use std::sync::Arc;

use livefeed_common::detection::DetectionRecord;

use crate::shared::SharedFrameState;

/// Read-only view of the latest detections, independent of the video stream.
#[derive(Clone)]
pub struct DetectionQuery {
    shared: Arc<SharedFrameState>,
}

impl DetectionQuery {
    pub fn new(shared: Arc<SharedFrameState>) -> Self {
        Self { shared }
    }

    /// Detections of the most recently published frame; empty before the
    /// first publish. Valid whether or not the stream is running.
    pub fn latest(&self) -> Arc<[DetectionRecord]> {
        Arc::clone(&self.shared.snapshot().detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use livefeed_common::frame::Frame;

    #[test]
    fn empty_until_published_then_latest() {
        let shared = Arc::new(SharedFrameState::new(2, 2));
        let query = DetectionQuery::new(Arc::clone(&shared));
        assert!(query.latest().is_empty());

        shared.publish(
            Frame::new(1, 0, RgbImage::new(2, 2)),
            vec![DetectionRecord::new("person", 0.91)],
        );
        shared.publish(Frame::new(2, 0, RgbImage::new(2, 2)), Vec::new());
        assert!(query.latest().is_empty());

        shared.publish(
            Frame::new(3, 0, RgbImage::new(2, 2)),
            vec![DetectionRecord::new("car", 0.5)],
        );
        assert_eq!(&*query.latest(), &[DetectionRecord::new("car", 0.5)]);
    }
}
