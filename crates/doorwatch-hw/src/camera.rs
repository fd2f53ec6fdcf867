//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
/// Driver-side frame queue depth; this many frames may be stale when reading resumes.
pub const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Anything that yields frames one at a time. Blocking is expected: the
/// source's frame rate paces the caller.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " => Some(Self::Y16),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 capture device by path (e.g., "/dev/video0") and negotiate 640x480.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {msg}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::debug!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "capture device"
        );

        let (width, height, fourcc, pixel_format) = negotiate(&device)?;

        Ok(Self {
            device,
            width,
            height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. Frames are pulled from the returned stream until it is dropped.
    pub fn stream(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(CameraStream {
            camera: self,
            stream,
        })
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let converted = match self.pixel_format {
            PixelFormat::Grey if buf.len() >= pixels => Ok(buf[..pixels].to_vec()),
            PixelFormat::Grey => Err(frame::FrameError::InvalidLength {
                expected: pixels,
                actual: buf.len(),
            }),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
            });
        }

        devices
    }
}

/// Ask for YUYV at the capture size; accept whatever grayscale-convertible format the driver picks.
fn negotiate(device: &Device) -> Result<(u32, u32, FourCC, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = CAPTURE_WIDTH;
    fmt.height = CAPTURE_HEIGHT;

    let got = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
            got.fourcc
        ))
    })?;
    Ok((got.width, got.height, got.fourcc, pixel_format))
}

/// An active capture stream on a [`Camera`].
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let gray = self.camera.buf_to_grayscale(buf)?;
        Frame::from_gray(gray, self.camera.width, self.camera.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/doorwatch-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
