use std::sync::Arc;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use super::{Annotated, AnnotateError, Annotator, Detector};

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 194, 255],
];

/// Runs a [`Detector`] and draws a box per detection onto a copy of the frame.
pub struct OverlayAnnotator {
    detector: Arc<dyn Detector>,
    thickness: u32,
}

impl OverlayAnnotator {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            thickness: 2,
        }
    }

    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness.max(1);
        self
    }
}

impl Annotator for OverlayAnnotator {
    fn annotate(&self, image: &RgbImage) -> Result<Annotated, AnnotateError> {
        let detections = self.detector.detect(image)?;
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();

        for det in &detections {
            let Some(bbox) = det.bbox.clamped(width, height) else {
                debug!(label = det.label, "detection box outside frame, not drawn");
                continue;
            };
            let color = label_color(&det.label);
            // Nested outlines grow inward so thick boxes stay inside the frame.
            for inset in 0..self.thickness {
                if bbox.width <= 2 * inset || bbox.height <= 2 * inset {
                    break;
                }
                let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32)
                    .of_size(bbox.width - 2 * inset, bbox.height - 2 * inset);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }

        Ok(Annotated {
            image: canvas,
            detections: detections.iter().map(|d| d.record()).collect(),
        })
    }
}

/// Stable colour per label.
fn label_color(label: &str) -> Rgb<u8> {
    // FNV-1a
    let hash = label
        .bytes()
        .fold(0x811c9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x01000193));
    Rgb(PALETTE[hash as usize % PALETTE.len()])
}
