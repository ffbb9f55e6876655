//! Epoch-guarded capture state shared by the surface and its tasks.
//!
//! Each open bumps the epoch; tasks started for an older epoch find their
//! writes rejected. Single-threaded: lives in an `Rc` on the surface thread.

use faceframe_core::{CaptureMachine, CaptureState, TransitionError};
use std::cell::{Cell, RefCell};
use tokio::sync::watch;

pub(crate) struct Lifecycle {
    epoch: Cell<u64>,
    machine: RefCell<CaptureMachine>,
    published: watch::Sender<CaptureState>,
}

impl Lifecycle {
    pub(crate) fn new(published: watch::Sender<CaptureState>) -> Self {
        Self {
            epoch: Cell::new(0),
            machine: RefCell::new(CaptureMachine::new()),
            published,
        }
    }

    /// Start a new activation and return its epoch.
    pub(crate) fn begin(&self) -> u64 {
        self.invalidate();
        self.epoch.get()
    }

    /// Supersede the current activation.
    pub(crate) fn invalidate(&self) {
        self.epoch.set(self.epoch.get() + 1);
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.get() == epoch
    }

    pub(crate) fn state(&self) -> CaptureState {
        self.machine.borrow().state()
    }

    /// Apply a detection outcome from the loop of `epoch`.
    ///
    /// Returns `false` when the epoch is stale and nothing was written.
    pub(crate) fn observe(&self, epoch: u64, aligned: bool) -> bool {
        if !self.is_current(epoch) {
            tracing::debug!(epoch, "discarding detection from superseded activation");
            return false;
        }
        let changed = self.machine.borrow_mut().observe(aligned);
        self.publish(changed);
        true
    }

    pub(crate) fn capture(&self) -> Result<(), TransitionError> {
        self.machine.borrow_mut().capture()?;
        self.publish(Some(CaptureState::Captured));
        Ok(())
    }

    pub(crate) fn retake(&self) -> Result<(), TransitionError> {
        self.machine.borrow_mut().retake()?;
        self.publish(Some(CaptureState::None));
        Ok(())
    }

    pub(crate) fn reset(&self) {
        let changed = self.machine.borrow_mut().reset();
        self.publish(changed);
    }

    fn publish(&self, changed: Option<CaptureState>) {
        if let Some(state) = changed {
            self.published.send_replace(state);
            tracing::debug!(%state, "capture state changed");
        }
    }
}
