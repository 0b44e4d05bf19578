//! V4L2 capture in MJPG format with memory-mapped buffers.

use image::RgbImage;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{decode_jpeg, CameraBackend, CaptureDevice, CaptureError};

const BUFFER_COUNT: u32 = 4;

/// Local camera at `/dev/video<index>`.
pub struct V4lCamera {
    width: u32,
    height: u32,
}

impl V4lCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl CameraBackend for V4lCamera {
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            index: device_index,
            reason,
        };

        let device = Device::new(device_index as usize).map_err(|e| unavailable(e.to_string()))?;
        let caps = device.query_caps().map_err(|e| unavailable(e.to_string()))?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(unavailable(format!("{} does not support video capture", caps.card)));
        }

        let mut fmt = device.format().map_err(|e| unavailable(e.to_string()))?;
        fmt.width = self.width;
        fmt.height = self.height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device.set_format(&fmt).map_err(|e| unavailable(e.to_string()))?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(unavailable(format!("MJPG not supported, driver chose {}", fmt.fourcc)));
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| unavailable(e.to_string()))?;

        info!(
            device_index,
            card = caps.card,
            driver = caps.driver,
            width = fmt.width,
            height = fmt.height,
            "V4L2 capture stream started"
        );

        Ok(Box::new(V4lDevice {
            stream,
            _device: device,
        }))
    }

    fn name(&self) -> &str {
        "v4l"
    }
}

struct V4lDevice {
    // Declared before the device so the mapping is released first.
    stream: MmapStream<'static>,
    _device: Device,
}

impl CaptureDevice for V4lDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;
        if meta.bytesused == 0 {
            return Err(CaptureError::ReadFailed("empty buffer".into()));
        }
        let used = buf.get(..meta.bytesused as usize).unwrap_or(buf);
        decode_jpeg(used)
    }

    fn close(self: Box<Self>) {
        debug!("V4L2 device closed");
    }
}
