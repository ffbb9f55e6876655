//! Guide circle geometry and face alignment test.
//!
//! The guide is a circle centered in the capture frame whose diameter scales
//! with the shorter side of the viewport, clamped so it stays usable on tiny
//! and huge displays alike.

use crate::types::{BoundingBox, ViewportDims};
use serde::Serialize;

const GUIDE_SCALE: f32 = 0.6;
const GUIDE_MIN_DIAMETER: f32 = 180.0;
const GUIDE_MAX_DIAMETER: f32 = 420.0;

/// Guide circle in display pixels. Derived from [`ViewportDims`] on every use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuideGeometry {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
}

impl GuideGeometry {
    /// Compute the guide for a viewport.
    ///
    /// `diameter = clamp(min(width, height) * 0.6, 180, 420)`, centered.
    pub fn for_viewport(dims: ViewportDims) -> Self {
        let width = dims.width as f32;
        let height = dims.height as f32;
        let diameter = (width.min(height) * GUIDE_SCALE).clamp(GUIDE_MIN_DIAMETER, GUIDE_MAX_DIAMETER);

        Self {
            center_x: width / 2.0,
            center_y: height / 2.0,
            radius: diameter / 2.0,
        }
    }

    pub fn diameter(&self) -> f32 {
        self.radius * 2.0
    }

    /// Inclusive point-in-circle test: a point exactly on the rim is inside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

/// Map a point from native frame pixels into display pixels.
///
/// The preview is assumed to fill the viewport the way a cover-fit video
/// element does: uniform scale `max(dw/fw, dh/fh)`, overflow cropped evenly on
/// both sides. Equal sizes map to the identity.
pub fn frame_to_display(point: (f32, f32), frame: (u32, u32), dims: ViewportDims) -> (f32, f32) {
    let (fw, fh) = (frame.0 as f32, frame.1 as f32);
    if fw <= 0.0 || fh <= 0.0 {
        return point;
    }
    let (dw, dh) = (dims.width as f32, dims.height as f32);

    let scale = (dw / fw).max(dh / fh);
    let offset_x = (dw - fw * scale) / 2.0;
    let offset_y = (dh - fh * scale) / 2.0;

    (point.0 * scale + offset_x, point.1 * scale + offset_y)
}

/// Whether a detected face is centered inside the guide.
///
/// `frame` is the native resolution the box was detected in.
pub fn is_aligned(face: &BoundingBox, frame: (u32, u32), dims: ViewportDims) -> bool {
    let guide = GuideGeometry::for_viewport(dims);
    let (x, y) = frame_to_display(face.center(), frame, dims);
    guide.contains(x, y)
}
