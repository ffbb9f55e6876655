//! Viewport tracker: republishes the rendered capture-frame size.
//!
//! Size reports arrive in bursts during resizes and rotations. Reports are
//! parked and flushed once per frame tick on the surface's `LocalSet`, so
//! guide geometry is recomputed at most once per tick.

use faceframe_core::{GuideGeometry, ViewportDims};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ViewportTracker {
    inner: Rc<Inner>,
}

struct Inner {
    published: watch::Sender<ViewportDims>,
    pending: Cell<Option<ViewportDims>>,
    scheduled: Cell<bool>,
    tick: Duration,
    recomputations: Cell<u64>,
}

impl ViewportTracker {
    /// Publish through `published`; its current value is the initial size.
    pub fn new(published: watch::Sender<ViewportDims>, tick: Duration) -> Self {
        Self {
            inner: Rc::new(Inner {
                published,
                pending: Cell::new(None),
                scheduled: Cell::new(false),
                tick,
                recomputations: Cell::new(0),
            }),
        }
    }

    pub fn current(&self) -> ViewportDims {
        *self.inner.published.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewportDims> {
        self.inner.published.subscribe()
    }

    /// Number of flushes that carried a pending size.
    pub fn recomputations(&self) -> u64 {
        self.inner.recomputations.get()
    }

    /// Record a size report. Must be called from within a `LocalSet`.
    pub fn notify(&self, dims: ViewportDims) {
        if dims.is_empty() {
            tracing::debug!(%dims, "ignoring empty viewport report");
            return;
        }
        self.inner.pending.set(Some(dims));
        if self.inner.scheduled.replace(true) {
            return;
        }

        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(inner.tick).await;
            inner.flush();
        });
    }
}

impl Inner {
    fn flush(&self) {
        self.scheduled.set(false);
        let Some(dims) = self.pending.take() else {
            return;
        };
        self.recomputations.set(self.recomputations.get() + 1);

        let changed = self.published.send_if_modified(|current| {
            if *current == dims {
                false
            } else {
                *current = dims;
                true
            }
        });
        if changed {
            let guide = GuideGeometry::for_viewport(dims);
            tracing::debug!(%dims, radius = guide.radius, "viewport changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    const TICK: Duration = Duration::from_millis(16);

    fn tracker() -> (ViewportTracker, watch::Receiver<ViewportDims>) {
        let (tx, rx) = watch::channel(ViewportDims::default());
        (ViewportTracker::new(tx, TICK), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_value_defined() {
        let (tracker, _rx) = tracker();
        assert_eq!(tracker.current(), ViewportDims::new(640, 480));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesced_to_one_recomputation() {
        LocalSet::new()
            .run_until(async {
                let (tracker, rx) = tracker();

                tracker.notify(ViewportDims::new(800, 600));
                tracker.notify(ViewportDims::new(900, 700));
                tracker.notify(ViewportDims::new(1024, 768));
                assert_eq!(tracker.current(), ViewportDims::new(640, 480));

                tokio::time::sleep(TICK * 2).await;
                assert_eq!(tracker.current(), ViewportDims::new(1024, 768));
                assert_eq!(tracker.recomputations(), 1);
                assert!(rx.has_changed().unwrap());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_size_not_republished() {
        LocalSet::new()
            .run_until(async {
                let (tracker, rx) = tracker();

                tracker.notify(ViewportDims::new(640, 480));
                tokio::time::sleep(TICK * 2).await;
                assert_eq!(tracker.recomputations(), 1);
                assert!(!rx.has_changed().unwrap());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_ticks_each_flush() {
        LocalSet::new()
            .run_until(async {
                let (tracker, _rx) = tracker();
                tracker.notify(ViewportDims::new(800, 600));
                tokio::time::sleep(TICK * 2).await;
                tracker.notify(ViewportDims::new(600, 800));
                tokio::time::sleep(TICK * 2).await;
                assert_eq!(tracker.recomputations(), 2);
                assert_eq!(tracker.current(), ViewportDims::new(600, 800));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_report_ignored() {
        LocalSet::new()
            .run_until(async {
                let (tracker, _rx) = tracker();
                tracker.notify(ViewportDims::new(0, 0));
                tokio::time::sleep(TICK * 2).await;
                assert_eq!(tracker.recomputations(), 0);
                assert_eq!(tracker.current(), ViewportDims::default());
            })
            .await;
    }
}
