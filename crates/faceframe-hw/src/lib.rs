//! faceframe-hw: hardware abstraction for camera streams.
//!
//! Defines the blocking video track contract the capture engine drives, a
//! V4L2 implementation of it, and pixel conversion to packed RGB8.

pub mod camera;
pub mod frame;

pub use camera::{
    CameraError, DeviceInfo, FacingMode, PixelFormat, StreamConstraints, V4lDevice, V4lTrack,
    VideoDevice, VideoTrack, FRAME_TIMEOUT,
};
pub use frame::{Frame, FrameError};
