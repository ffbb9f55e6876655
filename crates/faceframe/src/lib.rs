//! faceframe: face-guided still capture.
//!
//! Opens a camera, runs a face detector on every frame tick, and enables
//! capture only while the face sits inside a guide circle sized to the
//! viewport. The captured JPEG leaves the engine once, through the caller's
//! commit callback.
//!
//! ```no_run
//! use faceframe::{spawn_surface, OnnxLoader, OpenOptions, SurfaceConfig};
//! use faceframe_hw::V4lDevice;
//!
//! # async fn run() -> Result<(), faceframe::SurfaceError> {
//! let surface = spawn_surface(
//!     V4lDevice::new("/dev/video0"),
//!     OnnxLoader::new("/usr/share/faceframe/models/det_10g.onnx"),
//!     SurfaceConfig::default(),
//! )?;
//! surface
//!     .open(OpenOptions::new(|photo| println!("{}", photo.to_data_url())).title("Profile photo"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
mod detection;
pub mod detector;
pub mod gate;
mod lifecycle;
pub mod session;
pub mod surface;
pub mod viewport;

#[cfg(test)]
mod testing;

pub use capture::{encode_still, CaptureError, CapturedImage, JPEG_MIME};
pub use config::SurfaceConfig;
pub use detector::{DetectorLoader, FaceDetector, OnnxFaceDetector, OnnxLoader};
pub use gate::GateOutcome;
pub use session::{CameraSession, VideoSink};
pub use surface::{spawn_surface, OpenOptions, SurfaceError, SurfaceHandle, SurfaceStatus, SurfaceView};
pub use viewport::ViewportTracker;
