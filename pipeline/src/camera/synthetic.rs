use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use tracing::debug;

use super::{CameraBackend, CaptureDevice, CaptureError};

const SQUARE: u32 = 48;

/// Test-pattern source: a scrolling gradient with a bouncing square,
/// paced at a fixed frame rate.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    interval: Duration,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps.max(0.1)),
        }
    }
}

impl CameraBackend for SyntheticCamera {
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        debug!(device_index, width = self.width, height = self.height, "opening synthetic camera");
        Ok(Box::new(SyntheticDevice {
            width: self.width,
            height: self.height,
            interval: self.interval,
            tick: 0,
            next_due: Instant::now(),
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticDevice {
    width: u32,
    height: u32,
    interval: Duration,
    tick: u32,
    next_due: Instant,
}

impl SyntheticDevice {
    fn render(&self) -> RgbImage {
        let (w, h, t) = (self.width, self.height, self.tick);
        let span_x = w.saturating_sub(SQUARE).max(1);
        let span_y = h.saturating_sub(SQUARE).max(1);
        // Triangle wave so the square bounces between edges.
        let bounce = |pos: u32, span: u32| {
            let p = pos % (2 * span);
            if p < span { p } else { 2 * span - p }
        };
        let sx = bounce(t.wrapping_mul(4), span_x);
        let sy = bounce(t.wrapping_mul(3), span_y);

        RgbImage::from_fn(w, h, |x, y| {
            if x >= sx && x < sx + SQUARE && y >= sy && y < sy + SQUARE {
                Rgb([255, 255, 255])
            } else {
                let shade = (x.wrapping_add(t) % 256) as u8;
                Rgb([shade, (y % 256) as u8, 128])
            }
        })
    }
}

impl CaptureDevice for SyntheticDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now().max(self.next_due) + self.interval;
        let frame = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(frame)
    }

    fn close(self: Box<Self>) {
        debug!(frames = self.tick, "synthetic camera closed");
    }
}
