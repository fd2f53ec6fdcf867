//! Frame type and image processing: pixel conversion, downscaling, snapshot crops.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap grayscale pixels, checking the buffer covers `width * height`.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn to_image(&self) -> Result<GrayImage, FrameError> {
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width as usize) * (self.height as usize),
                actual: self.data.len(),
            },
        )
    }

    fn from_image(img: GrayImage, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Resize by `factor` (bilinear). A factor of 1.0 or more returns a copy.
    pub fn downscale(&self, factor: f32) -> Result<Frame, FrameError> {
        if factor >= 1.0 {
            return Ok(self.clone());
        }
        if factor <= 0.0 || !factor.is_finite() {
            return Err(FrameError::InvalidScale(factor));
        }
        let w = ((self.width as f32 * factor).round() as u32).max(1);
        let h = ((self.height as f32 * factor).round() as u32).max(1);
        let img = self.to_image()?;
        let resized = imageops::resize(&img, w, h, FilterType::Triangle);
        Ok(Self::from_image(resized, self.sequence))
    }

    /// Crop the rectangle `(x, y, width, height)` grown by `pad` pixels on each
    /// side and clamped to the frame. `None` if nothing of it lies inside.
    pub fn crop_padded(&self, x: f32, y: f32, width: f32, height: f32, pad: u32) -> Option<Frame> {
        let pad = pad as f32;
        let left = (x.floor() - pad).max(0.0);
        let top = (y.floor() - pad).max(0.0);
        let right = ((x + width).ceil() + pad).min(self.width as f32);
        let bottom = ((y + height).ceil() + pad).min(self.height as f32);
        if !(right > left && bottom > top) {
            return None;
        }
        let (left, top) = (left as u32, top as u32);
        let (w, h) = (right as u32 - left, bottom as u32 - top);
        let img = self.to_image().ok()?;
        let cropped = imageops::crop_imm(&img, left, top, w, h).to_image();
        Some(Self::from_image(cropped, self.sequence))
    }

    /// Encode as JPEG.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, FrameError> {
        let img = self.to_image()?;
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if y16.len() < pixels * 2 {
        return Err(FrameError::InvalidLength {
            expected: pixels * 2,
            actual: y16.len(),
        });
    }
    Ok(y16[..pixels * 2].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid scale factor {0}")]
    InvalidScale(f32),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        Frame::from_gray(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let y16 = vec![0x34, 0x12, 0xFF, 0x80];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_from_gray_rejects_short_buffer() {
        assert!(Frame::from_gray(vec![0; 5], 2, 3, 0).is_err());
    }

    #[test]
    fn test_downscale_half() {
        let frame = gradient(640, 480);
        let small = frame.downscale(0.5).unwrap();
        assert_eq!((small.width, small.height), (320, 240));
        assert_eq!(small.data.len(), 320 * 240);
    }

    #[test]
    fn test_downscale_identity_and_invalid() {
        let frame = gradient(8, 8);
        assert_eq!(frame.downscale(1.0).unwrap().data, frame.data);
        assert!(matches!(frame.downscale(0.0), Err(FrameError::InvalidScale(_))));
    }

    #[test]
    fn test_crop_padded_inside() {
        let frame = gradient(200, 100);
        let crop = frame.crop_padded(50.0, 40.0, 20.0, 10.0, 5).unwrap();
        assert_eq!((crop.width, crop.height), (30, 20));
        // Top-left pixel of the crop is (45, 35) in the source.
        assert_eq!(crop.data[0], frame.data[35 * 200 + 45]);
    }

    #[test]
    fn test_crop_padded_clamps_to_frame() {
        let frame = gradient(100, 100);
        let crop = frame.crop_padded(5.0, 90.0, 20.0, 20.0, 30).unwrap();
        assert_eq!((crop.width, crop.height), (55, 40));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = gradient(100, 100);
        assert!(frame.crop_padded(300.0, 300.0, 10.0, 10.0, 0).is_none());
    }

    #[test]
    fn test_to_jpeg_has_soi_marker() {
        let jpeg = gradient(32, 16).to_jpeg().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
