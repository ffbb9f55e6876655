//! faceframe-core: guide geometry, capture state machine and face detection.
//!
//! Pure, runtime-free building blocks of the face-guided capture engine.
//! SCRFD detection runs via ONNX Runtime on the CPU.

pub mod detector;
pub mod guide;
pub mod state;
pub mod types;

pub use detector::{DetectorError, ScrfdDetector, SCRFD_MODEL_FILE};
pub use guide::GuideGeometry;
pub use state::{CaptureMachine, CaptureState, Controls, GuideTone, TransitionError};
pub use types::{BoundingBox, ViewportDims};
