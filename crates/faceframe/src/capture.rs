//! One-shot still capture: native-resolution frame to JPEG.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use faceframe_hw::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no video frame available yet")]
    NoFrame,
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// An encoded still photo. Handed to the caller exactly once, on commit.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl CapturedImage {
    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:image/jpeg;base64,...`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", JPEG_MIME, BASE64_STANDARD.encode(&self.bytes))
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("mime", &JPEG_MIME)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Rasterize `frame` once at its native resolution and JPEG-encode it.
pub fn encode_still(frame: &Frame, quality: u8) -> Result<CapturedImage, CaptureError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(CaptureError::InvalidFrame {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;

    Ok(CapturedImage {
        bytes,
        width: frame.width,
        height: frame.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_frame;

    #[test]
    fn test_encode_keeps_native_resolution() {
        let frame = test_frame(320, 240);
        let image = encode_still(&frame, 92).unwrap();
        assert_eq!(image.dimensions(), (320, 240));
        assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8], "JPEG SOI marker");

        let decoded = image::load_from_memory(image.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn test_data_url() {
        let image = encode_still(&test_frame(16, 16), 80).unwrap();
        let url = image.to_data_url();
        let payload = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        assert_eq!(BASE64_STANDARD.decode(payload).unwrap(), image.bytes());
    }

    #[test]
    fn test_encode_rejects_mismatched_buffer() {
        let mut frame = test_frame(16, 16);
        frame.data.truncate(10);
        assert!(matches!(encode_still(&frame, 90), Err(CaptureError::InvalidFrame { actual: 10, .. })));
    }
}
