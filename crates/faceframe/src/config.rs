use faceframe_core::ViewportDims;
use faceframe_hw::{FacingMode, StreamConstraints};
use serde::Deserialize;
use std::time::Duration;

/// Capture engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Detection loop and viewport tick, in milliseconds (~one display frame).
    pub frame_interval_ms: u64,
    /// Preferred camera width; the device may negotiate another size.
    pub preferred_width: u32,
    /// Preferred camera height.
    pub preferred_height: u32,
    /// Which camera to request.
    pub facing: FacingMode,
    /// JPEG quality of the captured still (1–100).
    pub jpeg_quality: u8,
    /// Viewport assumed until the first resize report.
    pub default_viewport: ViewportDims,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            preferred_width: 1280,
            preferred_height: 720,
            facing: FacingMode::User,
            jpeg_quality: 92,
            default_viewport: ViewportDims::default(),
        }
    }
}

impl SurfaceConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn constraints(&self) -> StreamConstraints {
        StreamConstraints {
            facing: self.facing,
            width: self.preferred_width,
            height: self.preferred_height,
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality.clamp(1, 100)
    }
}
