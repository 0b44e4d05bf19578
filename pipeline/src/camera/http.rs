use std::io::Read;
use std::time::Duration;

use image::RgbImage;
use tracing::{debug, info};

use super::{decode_jpeg, CameraBackend, CaptureDevice, CaptureError};
use crate::mjpeg::{boundary_from_content_type, MjpegParser, BOUNDARY};

const READ_CHUNK: usize = 64 * 1024;
/// Upper bound on buffered bytes without a complete frame.
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

/// Network camera serving `multipart/x-mixed-replace` MJPEG over HTTP.
///
/// The device index is ignored; one URL is one camera.
pub struct HttpMjpegCamera {
    url: String,
    read_timeout: Duration,
}

impl HttpMjpegCamera {
    pub fn new(url: String, read_timeout: Duration) -> Self {
        Self { url, read_timeout }
    }
}

impl CameraBackend for HttpMjpegCamera {
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            index: device_index,
            reason,
        };

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(self.read_timeout)
            .build();
        let response = agent
            .get(&self.url)
            .call()
            .map_err(|e| unavailable(e.to_string()))?;

        let content_type = response.header("Content-Type").unwrap_or_default().to_string();
        let boundary = boundary_from_content_type(&content_type).unwrap_or_else(|| BOUNDARY.into());
        info!(url = self.url, boundary, content_type, "connected to MJPEG camera");

        Ok(Box::new(HttpMjpegDevice {
            reader: response.into_reader(),
            parser: MjpegParser::new(&boundary),
            chunk: vec![0; READ_CHUNK],
            broken: None,
        }))
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

struct HttpMjpegDevice {
    reader: Box<dyn Read + Send + Sync>,
    parser: MjpegParser,
    chunk: Vec<u8>,
    /// Set once the connection fails; the stream cannot resume after that.
    broken: Option<String>,
}

impl HttpMjpegDevice {
    fn mark_broken(&mut self, reason: String) -> CaptureError {
        self.broken = Some(reason.clone());
        CaptureError::ReadFailed(reason)
    }
}

impl CaptureDevice for HttpMjpegDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        if let Some(reason) = &self.broken {
            return Err(CaptureError::ReadFailed(reason.clone()));
        }
        loop {
            if let Some(jpeg) = self.parser.next_frame() {
                return decode_jpeg(&jpeg);
            }
            if self.parser.buffered() > MAX_BUFFERED {
                let reason = format!("no frame boundary within {} bytes", self.parser.buffered());
                return Err(self.mark_broken(reason));
            }
            let n = match self.reader.read(&mut self.chunk) {
                Ok(0) => return Err(self.mark_broken("stream ended".into())),
                Ok(n) => n,
                Err(e) => return Err(self.mark_broken(e.to_string())),
            };
            self.parser.push(&self.chunk[..n]);
        }
    }

    fn close(self: Box<Self>) {
        debug!("MJPEG camera connection closed");
    }
}
