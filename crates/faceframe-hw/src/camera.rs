//! Camera stream contract and its V4L2 implementation via the `v4l` crate.

use crate::frame::{self, Frame};
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;

/// Longest a single frame read may block.
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera found at {0}")]
    DeviceNotFound(String),
    #[error("camera access was denied for {0}; check device permissions (video group)")]
    PermissionDenied(String),
    #[error("camera is in use by another application")]
    DeviceBusy,
    #[error("camera format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("camera does not support video streaming")]
    StreamingNotSupported,
    #[error("camera capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera stream is not playing")]
    NotPlaying,
    #[error("camera delivered no frame within {0:?}")]
    FrameTimeout(Duration),
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user.
    #[default]
    User,
    /// Rear camera.
    Environment,
}

/// What the caller asks of a video stream. Video only; audio is never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: FacingMode,
    /// Preferred width; the device may negotiate something else.
    pub width: u32,
    /// Preferred height; the device may negotiate something else.
    pub height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            width: 1280,
            height: 720,
        }
    }
}

/// A source of video tracks (a physical camera, or a fake in tests).
pub trait VideoDevice: Send + Sync + 'static {
    type Track: VideoTrack;

    /// Acquire a track matching `constraints`. Fails with a human-readable error.
    fn open(&self, constraints: &StreamConstraints) -> Result<Self::Track, CameraError>;
}

/// One live video track. Blocking; driven from a dedicated thread.
pub trait VideoTrack: Send + 'static {
    /// Negotiated native resolution.
    fn resolution(&self) -> (u32, u32);

    /// Begin streaming.
    fn play(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame is available, or fail with
    /// [`CameraError::FrameTimeout`] once [`FRAME_TIMEOUT`] passes without one.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Halt streaming and release device buffers. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion JPEG, one JPEG image per buffer.
    Mjpg,
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(Self::Mjpg),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, frame::FrameError> {
        match self {
            Self::Mjpg => frame::mjpeg_to_rgb(buf, width, height),
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
        }
    }
}

/// V4L2 cameras, one device node per facing mode.
#[derive(Debug, Clone)]
pub struct V4lDevice {
    user_facing: String,
    environment_facing: Option<String>,
}

impl V4lDevice {
    /// Use `device_path` (e.g. "/dev/video0") for the user-facing camera.
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            user_facing: device_path.into(),
            environment_facing: None,
        }
    }

    /// Also register a rear camera.
    pub fn with_environment(mut self, device_path: impl Into<String>) -> Self {
        self.environment_facing = Some(device_path.into());
        self
    }

    /// Device node serving `facing`. Without a rear camera, the front one is used.
    pub fn path_for(&self, facing: FacingMode) -> &str {
        match (facing, &self.environment_facing) {
            (FacingMode::Environment, Some(path)) => path,
            (FacingMode::Environment, None) => {
                tracing::warn!(
                    device = %self.user_facing,
                    "no environment-facing camera configured; using user-facing camera"
                );
                &self.user_facing
            }
            (FacingMode::User, _) => &self.user_facing,
        }
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
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoDevice for V4lDevice {
    type Track = V4lTrack;

    fn open(&self, constraints: &StreamConstraints) -> Result<V4lTrack, CameraError> {
        let path = self.path_for(constraints.facing);
        V4lTrack::open(path, constraints.width, constraints.height)
    }
}

/// A negotiated V4L2 capture stream.
pub struct V4lTrack {
    device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    stream: Option<MmapStream<'static>>,
}

impl V4lTrack {
    fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let flags = caps.capabilities;
        if !flags.contains(v4l::capability::Flags::VIDEO_CAPTURE)
            || !flags.contains(v4l::capability::Flags::STREAMING)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // MJPG reaches HD frame rates on most UVC webcams; fall back to YUYV.
        let mut negotiated = None;
        for fourcc in [b"MJPG", b"YUYV"] {
            let mut fmt = device.format().map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
            fmt.fourcc = FourCC::new(fourcc);
            fmt.width = width;
            fmt.height = height;

            let got = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if let Some(pixel_format) = PixelFormat::from_fourcc(got.fourcc) {
                negotiated = Some((got, pixel_format));
                break;
            }
        }

        let (fmt, pixel_format) = negotiated.ok_or_else(|| {
            CameraError::FormatNegotiationFailed("device offers none of MJPG, YUYV, GREY".into())
        })?;

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            requested_width = width,
            requested_height = height,
            "negotiated format"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width: fmt.width,
            height: fmt.height,
            pixel_format,
            stream: None,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Buffers are queued and streaming starts on the first `next`.
    fn new_stream(&self) -> Result<MmapStream<'static>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(FRAME_TIMEOUT);
        Ok(stream)
    }
}

impl VideoTrack for V4lTrack {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn play(&mut self) -> Result<(), CameraError> {
        if self.stream.is_none() {
            self.stream = Some(self.new_stream()?);
            tracing::debug!(device = %self.device_path, "stream created");
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotPlaying)?;

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                // The timed-out stream would re-queue a buffer it still owns; start over.
                tracing::debug!(device = %self.device_path, "frame timeout; recreating stream");
                self.stop();
                self.stream = Some(self.new_stream()?);
                return Err(CameraError::FrameTimeout(FRAME_TIMEOUT));
            }
            Err(e) => return Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))),
        };

        let used = meta.bytesused as usize;
        let payload = if used > 0 && used <= buf.len() { &buf[..used] } else { buf };
        let sequence = meta.sequence;

        let rgb = self
            .pixel_format
            .to_rgb(payload, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))?;

        Frame::from_rgb(rgb, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                tracing::warn!(device = %self.device_path, error = %e, "failed to stop stream");
            }
            tracing::debug!(device = %self.device_path, "stream stopped");
        }
    }
}

impl Drop for V4lTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(device_path.to_string())
    } else if e.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}
