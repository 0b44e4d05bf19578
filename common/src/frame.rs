use std::sync::OnceLock;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// A captured (and possibly annotated) camera frame.
///
/// Frames are never mutated once published. The JPEG encoding is computed on
/// first use and cached, so concurrent stream clients share one encode per
/// frame.
#[derive(Debug)]
pub struct Frame {
    /// Capture sequence number (1-based; 0 is the placeholder).
    pub seq: u64,
    /// Capture time, Unix millis.
    pub captured_at_ms: i64,
    image: RgbImage,
    jpeg: OnceLock<(u8, Bytes)>,
}

impl Frame {
    pub fn new(seq: u64, captured_at_ms: i64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at_ms,
            image,
            jpeg: OnceLock::new(),
        }
    }

    /// Black frame shown before anything has been captured.
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self::new(0, chrono::Utc::now().timestamp_millis(), RgbImage::new(width, height))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_placeholder(&self) -> bool {
        self.seq == 0
    }

    /// JPEG encoding of this frame at `quality`.
    ///
    /// The first encoding is cached; asking for a different quality encodes
    /// again without replacing the cached bytes.
    pub fn jpeg(&self, quality: u8) -> Result<Bytes, FrameError> {
        if let Some((cached_quality, bytes)) = self.jpeg.get() {
            if *cached_quality == quality {
                return Ok(bytes.clone());
            }
            return encode_jpeg(&self.image, quality);
        }
        let bytes = encode_jpeg(&self.image, quality)?;
        let (cached_quality, cached) = self.jpeg.get_or_init(|| (quality, bytes.clone()));
        if *cached_quality == quality {
            Ok(cached.clone())
        } else {
            Ok(bytes)
        }
    }
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, FrameError> {
    let mut buf = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(image)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to encode frame as JPEG: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_black_at_requested_size() {
        let frame = Frame::placeholder(640, 480);
        assert!(frame.is_placeholder());
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert!(frame.image().pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn jpeg_has_soi_marker_and_is_cached() {
        let frame = Frame::new(1, 1708300000000, RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10])));
        let first = frame.jpeg(80).unwrap();
        assert_eq!(&first[0..2], &[0xFF, 0xD8]);

        let second = frame.jpeg(80).unwrap();
        // Same allocation: the cached bytes were handed out again.
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn other_quality_does_not_replace_cache() {
        let frame = Frame::new(3, 0, RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])));
        let q80 = frame.jpeg(80).unwrap();
        let q20 = frame.jpeg(20).unwrap();
        assert_ne!(q80.as_ptr(), q20.as_ptr());
        assert_eq!(frame.jpeg(80).unwrap().as_ptr(), q80.as_ptr());
    }
}
