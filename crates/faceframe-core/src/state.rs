//! Capture state machine.
//!
//! ```text
//!            aligned              capture()
//!   None ──────────────▶ Ready ─────────────▶ Captured
//!    ▲ ◀────────────────  │                      │
//!    │   lost / outside                          │
//!    └────────────────────────── retake() ───────┘
//! ```
//!
//! Detection results only ever move between `None` and `Ready`. `Captured`
//! is frozen until an explicit retake or reset.

use serde::Serialize;
use thiserror::Error;

/// Authoritative capture status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    None,
    Ready,
    Captured,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureState::None => "none",
            CaptureState::Ready => "ready",
            CaptureState::Captured => "captured",
        };
        f.write_str(name)
    }
}

/// Which user controls are enabled in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub capture: bool,
    pub retake: bool,
    pub commit: bool,
}

/// Color class of the guide overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuideTone {
    /// No face in the guide.
    Searching,
    /// Face centered; capture enabled.
    Aligned,
    /// Preview frozen on the captured still.
    Frozen,
}

impl CaptureState {
    pub fn controls(self) -> Controls {
        match self {
            CaptureState::None => Controls { capture: false, retake: false, commit: false },
            CaptureState::Ready => Controls { capture: true, retake: false, commit: false },
            CaptureState::Captured => Controls { capture: false, retake: true, commit: true },
        }
    }

    pub fn tone(self) -> GuideTone {
        match self {
            CaptureState::None => GuideTone::Searching,
            CaptureState::Ready => GuideTone::Aligned,
            CaptureState::Captured => GuideTone::Frozen,
        }
    }

    /// Short instruction shown under the guide.
    pub fn hint(self) -> &'static str {
        match self {
            CaptureState::None => "Position your face inside the circle",
            CaptureState::Ready => "Hold still, ready to capture",
            CaptureState::Captured => "Photo captured",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("capture requires a face inside the guide (state: {0})")]
    NotReady(CaptureState),
    #[error("no captured photo to discard (state: {0})")]
    NotCaptured(CaptureState),
}

/// Owner of the current [`CaptureState`]; enforces the legal transitions.
#[derive(Debug, Default)]
pub struct CaptureMachine {
    state: CaptureState,
}

impl CaptureMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Apply one detection outcome. Returns the new state if it changed.
    ///
    /// Ignored while `Captured`.
    pub fn observe(&mut self, aligned: bool) -> Option<CaptureState> {
        if self.state == CaptureState::Captured {
            return None;
        }
        let next = if aligned { CaptureState::Ready } else { CaptureState::None };
        self.set(next)
    }

    /// `Ready -> Captured`. Any other state is rejected unchanged.
    pub fn capture(&mut self) -> Result<(), TransitionError> {
        match self.state {
            CaptureState::Ready => {
                self.state = CaptureState::Captured;
                Ok(())
            }
            other => Err(TransitionError::NotReady(other)),
        }
    }

    /// `Captured -> None`.
    pub fn retake(&mut self) -> Result<(), TransitionError> {
        match self.state {
            CaptureState::Captured => {
                self.state = CaptureState::None;
                Ok(())
            }
            other => Err(TransitionError::NotCaptured(other)),
        }
    }

    /// Back to `None` from anywhere (commit, close).
    pub fn reset(&mut self) -> Option<CaptureState> {
        self.set(CaptureState::None)
    }

    fn set(&mut self, next: CaptureState) -> Option<CaptureState> {
        if self.state == next {
            None
        } else {
            self.state = next;
            Some(next)
        }
    }
}
