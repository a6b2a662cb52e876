use crate::error::{CameraError, OfficecamError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

/// Raw interleaved pixel buffer with explicit (height, width, channels) shape.
///
/// The pixel data is immutable once built; clones share the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonic frame identifier assigned by the source
    pub id: u64,
    /// Capture time
    pub timestamp: SystemTime,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    /// Row-major, channel-interleaved bytes
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    /// Build a frame, checking that the buffer matches the declared shape
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        height: u32,
        width: u32,
        channels: u32,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = expected_len(height, width, channels);
        if data.len() != expected {
            return Err(CameraError::InvalidFrame {
                details: format!(
                    "buffer of {} bytes does not match shape ({}, {}, {}) = {} bytes",
                    data.len(),
                    height,
                    width,
                    channels,
                    expected
                ),
            }
            .into());
        }

        Ok(Self {
            id,
            timestamp,
            height,
            width,
            channels,
            data: Arc::new(data),
        })
    }

    /// Shape as (height, width, channels)
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.height, self.width, self.channels)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn to_dynamic(&self) -> Result<DynamicImage> {
        let data = self.data.as_ref().clone();
        let image = match self.channels {
            1 => ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(self.width, self.height, data)
                .map(DynamicImage::ImageLuma8),
            3 => ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, data)
                .map(DynamicImage::ImageRgb8),
            4 => ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(self.width, self.height, data)
                .map(DynamicImage::ImageRgba8),
            other => {
                return Err(CameraError::InvalidFrame {
                    details: format!("unsupported channel count {}", other),
                }
                .into())
            }
        };

        image.ok_or_else(|| {
            CameraError::InvalidFrame {
                details: format!("frame {} buffer shorter than its shape", self.id),
            }
            .into()
        })
    }

    /// Rebuild a frame from a decoded or processed image, keeping id and timestamp
    pub fn from_dynamic(id: u64, timestamp: SystemTime, image: DynamicImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            other => (3, other.to_rgb8().into_raw()),
        };
        Self::new(id, timestamp, height, width, channels, data)
    }

    /// View as an RGB image, converting from gray or RGBA when needed
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        Ok(match self.to_dynamic()? {
            DynamicImage::ImageRgb8(buf) => buf,
            other => other.to_rgb8(),
        })
    }
}

fn expected_len(height: u32, width: u32, channels: u32) -> usize {
    height as usize * width as usize * channels as usize
}

/// Image operations applied by the processing loop
pub struct FrameProcessor;

impl FrameProcessor {
    /// Resize to (width, height) with an area-averaging filter. The channel count is preserved.
    pub fn downscale(frame: &Frame, size: (u32, u32)) -> Result<Frame> {
        let (width, height) = size;
        if frame.width == width && frame.height == height {
            return Ok(frame.clone());
        }

        let resized = frame
            .to_dynamic()?
            .resize_exact(width, height, FilterType::Triangle);

        trace!(
            "Downscaled frame {} from {}x{} to {}x{}",
            frame.id,
            frame.width,
            frame.height,
            width,
            height
        );

        Frame::from_dynamic(frame.id, frame.timestamp, resized)
    }

    /// Encode a frame as baseline JPEG
    pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);

        if frame.channels == 1 {
            encoder.encode(
                frame.data.as_slice(),
                frame.width,
                frame.height,
                image::ColorType::L8,
            )?;
        } else {
            let rgb = frame.to_rgb_image()?;
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }

        Ok(buf)
    }

    /// Decode an image file's bytes into a frame
    pub fn decode(id: u64, bytes: &[u8]) -> Result<Frame> {
        let image = image::load_from_memory(bytes).map_err(OfficecamError::Image)?;
        Frame::from_dynamic(id, SystemTime::now(), image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(height: u32, width: u32, channels: u32) -> Frame {
        let data = (0..expected_len(height, width, channels))
            .map(|i| (i % 251) as u8)
            .collect();
        Frame::new(7, SystemTime::now(), height, width, channels, data).unwrap()
    }

    #[test]
    fn test_frame_shape_validation() {
        assert!(Frame::new(1, SystemTime::now(), 2, 2, 3, vec![0u8; 12]).is_ok());

        let err = Frame::new(1, SystemTime::now(), 2, 2, 3, vec![0u8; 11]).unwrap_err();
        assert!(matches!(
            err,
            OfficecamError::Camera(CameraError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = gradient(4, 4, 3);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &copy.data));
        assert_eq!(copy.shape(), (4, 4, 3));
    }

    #[test]
    fn test_downscale_preserves_channels() {
        let frame = gradient(480, 640, 3);
        let small = FrameProcessor::downscale(&frame, (320, 240)).unwrap();
        assert_eq!(small.shape(), (240, 320, 3));
        assert_eq!(small.len(), 240 * 320 * 3);
        assert_eq!(small.id, frame.id);

        let gray = gradient(100, 200, 1);
        let small = FrameProcessor::downscale(&gray, (50, 25)).unwrap();
        assert_eq!(small.shape(), (25, 50, 1));
    }

    #[test]
    fn test_downscale_same_size_is_cheap() {
        let frame = gradient(10, 10, 3);
        let same = FrameProcessor::downscale(&frame, (10, 10)).unwrap();
        assert!(Arc::ptr_eq(&frame.data, &same.data));
    }

    #[test]
    fn test_unsupported_channel_count() {
        let frame = gradient(4, 4, 2);
        assert!(FrameProcessor::downscale(&frame, (2, 2)).is_err());
    }

    #[test]
    fn test_encode_jpeg_and_decode() {
        let frame = gradient(48, 64, 3);
        let jpeg = FrameProcessor::encode_jpeg(&frame, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = FrameProcessor::decode(9, &jpeg).unwrap();
        assert_eq!(decoded.shape(), (48, 64, 3));
    }

    #[test]
    fn test_encode_jpeg_rgba() {
        let frame = gradient(8, 8, 4);
        let jpeg = FrameProcessor::encode_jpeg(&frame, 50).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
