//! doorwatch-hw — Camera capture and frame handling.
//!
//! Provides V4L2-based frame acquisition plus the frame operations the
//! detection loop needs: downscaling, padded snapshot crops, JPEG encoding.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, FrameSource, PixelFormat, STREAM_BUFFERS};
pub use frame::{Frame, FrameError};
