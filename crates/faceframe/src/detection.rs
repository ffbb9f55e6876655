//! Detection loop: one detector call per frame tick, never overlapping.
//!
//! The loop sleeps a tick, runs one awaited detection on the latest frame,
//! feeds the alignment result to the capture state, and only then schedules
//! the next tick. A slow detector slows the loop; work never queues up.

use crate::detector::FaceDetector;
use crate::lifecycle::Lifecycle;
use crate::session::VideoSink;
use faceframe_core::{guide, ViewportDims};
use faceframe_hw::Frame;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// The activation was closed or replaced.
    Superseded,
    /// The camera worker exited and the video sink closed.
    StreamEnded,
}

pub(crate) struct DetectionLoop<Det> {
    /// `None` when the model gate failed; every frame then counts as no face.
    pub(crate) detector: Option<Det>,
    pub(crate) frames: VideoSink,
    pub(crate) viewport: watch::Receiver<ViewportDims>,
    pub(crate) lifecycle: Rc<Lifecycle>,
    pub(crate) epoch: u64,
    pub(crate) tick: Duration,
}

impl<Det: FaceDetector> DetectionLoop<Det> {
    pub(crate) async fn run(self) -> LoopExit {
        tracing::info!(
            epoch = self.epoch,
            degraded = self.detector.is_none(),
            "detection loop started"
        );

        let exit = loop {
            tokio::time::sleep(self.tick).await;

            if !self.lifecycle.is_current(self.epoch) {
                break LoopExit::Superseded;
            }
            if self.frames.has_changed().is_err() {
                break LoopExit::StreamEnded;
            }
            let Some(frame) = self.frames.borrow().clone() else {
                continue;
            };

            let aligned = self.evaluate(frame).await;
            if !self.lifecycle.observe(self.epoch, aligned) {
                break LoopExit::Superseded;
            }
        };

        tracing::info!(epoch = self.epoch, ?exit, "detection loop stopped");
        exit
    }

    /// Whether the best face in `frame` sits inside the guide.
    async fn evaluate(&self, frame: Arc<Frame>) -> bool {
        let Some(detector) = &self.detector else {
            return false;
        };
        let native = frame.dimensions();

        match detector.detect(frame).await {
            Ok(Some(face)) => {
                let viewport = *self.viewport.borrow();
                guide::is_aligned(&face, native, viewport)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(error = %e, "detection failed; treating as no face");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{centered_face, test_frame, DetectorScript, ScriptedDetector};
    use faceframe_core::{BoundingBox, CaptureState};
    use tokio::task::{self, LocalSet};

    const TICK: Duration = Duration::from_millis(16);

    struct Harness {
        lifecycle: Rc<Lifecycle>,
        state: watch::Receiver<CaptureState>,
        frames: watch::Sender<Option<Arc<Frame>>>,
        _viewport: watch::Sender<ViewportDims>,
        epoch: u64,
    }

    fn start(detector: Option<ScriptedDetector>) -> (Harness, task::JoinHandle<LoopExit>) {
        start_in(detector, ViewportDims::new(640, 480))
    }

    fn start_in(
        detector: Option<ScriptedDetector>,
        dims: ViewportDims,
    ) -> (Harness, task::JoinHandle<LoopExit>) {
        let (state_tx, state) = watch::channel(CaptureState::None);
        let lifecycle = Rc::new(Lifecycle::new(state_tx));
        let epoch = lifecycle.begin();
        let (frames, frames_rx) = watch::channel(None);
        let (viewport_tx, viewport) = watch::channel(dims);

        let handle = task::spawn_local(
            DetectionLoop {
                detector,
                frames: frames_rx,
                viewport,
                lifecycle: Rc::clone(&lifecycle),
                epoch,
                tick: TICK,
            }
            .run(),
        );
        let harness = Harness {
            lifecycle,
            state,
            frames,
            _viewport: viewport_tx,
            epoch,
        };
        (harness, handle)
    }

    impl Harness {
        fn push_frame(&self) {
            self.push_frame_sized(640, 480);
        }

        fn push_frame_sized(&self, width: u32, height: u32) {
            self.frames.send_replace(Some(Arc::new(test_frame(width, height))));
        }

        fn state(&self) -> CaptureState {
            *self.state.borrow()
        }
    }

    async fn ticks(n: u32) {
        tokio::time::sleep(TICK * n).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frame_skips_detection() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let (h, _loop) = start(Some(ScriptedDetector::new(script.clone())));

                ticks(10).await;
                assert_eq!(script.calls(), 0);
                assert_eq!(h.state(), CaptureState::None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_enters_and_leaves_guide() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let (h, _loop) = start(Some(ScriptedDetector::new(script.clone())));
                h.push_frame();

                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);

                script.set_face(Some(BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 80.0,
                    height: 80.0,
                    confidence: 0.9,
                }));
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::None);

                script.set_face(Some(centered_face(640, 480)));
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);

                script.set_face(None);
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_alignment_uses_cover_fit_display_position() {
        LocalSet::new()
            .run_until(async {
                // 1280x720 frames in a 400x400 viewport: guide radius 120 at (200, 200).
                let script = DetectorScript::default();
                let (h, _loop) = start_in(
                    Some(ScriptedDetector::new(script.clone())),
                    ViewportDims::new(400, 400),
                );
                h.push_frame_sized(1280, 720);

                // Frame center lands on the guide center once scaled and cropped.
                script.set_face(Some(centered_face(1280, 720)));
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);

                // (200, 200) in frame pixels is the guide center only if read as
                // display pixels; on screen it sits left of the viewport.
                script.set_face(Some(BoundingBox {
                    x: 120.0,
                    y: 100.0,
                    width: 160.0,
                    height: 200.0,
                    confidence: 0.9,
                }));
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_error_counts_as_no_face() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let (h, handle) = start(Some(ScriptedDetector::new(script.clone())));
                h.push_frame();
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);

                script.set_failing(true);
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::None);
                assert!(!handle.is_finished());

                script.set_failing(false);
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_captured_state_is_frozen() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let (h, _loop) = start(Some(ScriptedDetector::new(script.clone())));
                h.push_frame();
                ticks(3).await;
                h.lifecycle.capture().unwrap();

                script.set_face(None);
                let calls = script.calls();
                ticks(5).await;
                assert!(script.calls() > calls, "loop keeps running while captured");
                assert_eq!(h.state(), CaptureState::Captured);

                h.lifecycle.retake().unwrap();
                script.set_face(Some(centered_face(640, 480)));
                ticks(3).await;
                assert_eq!(h.state(), CaptureState::Ready);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_detector_never_overlaps() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let detector = ScriptedDetector::new(script.clone()).with_delay(TICK * 5);
                let (h, _loop) = start(Some(detector));
                h.push_frame();

                ticks(60).await;
                assert_eq!(script.max_in_flight(), 1);
                // One call per (tick + delay), not one per tick.
                assert!(script.calls() <= 10, "calls = {}", script.calls());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_mode_never_ready() {
        LocalSet::new()
            .run_until(async {
                let (h, handle) = start(None);
                h.push_frame();
                ticks(10).await;
                assert_eq!(h.state(), CaptureState::None);
                assert!(!handle.is_finished());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_epoch_stops_loop() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                let (h, handle) = start(Some(ScriptedDetector::new(script.clone())));
                h.push_frame();
                ticks(2).await;

                h.lifecycle.invalidate();
                assert_eq!(handle.await.unwrap(), LoopExit::Superseded);
                let calls = script.calls();
                ticks(5).await;
                assert_eq!(script.calls(), calls);
                assert!(!h.lifecycle.is_current(h.epoch));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_detection_after_invalidate_discarded() {
        LocalSet::new()
            .run_until(async {
                let script = DetectorScript::default();
                script.set_face(Some(centered_face(640, 480)));
                let detector = ScriptedDetector::new(script.clone()).with_delay(TICK * 4);
                let (h, handle) = start(Some(detector));
                h.push_frame();

                // First call is in flight once the first tick has elapsed.
                ticks(2).await;
                assert_eq!(script.calls(), 1);
                h.lifecycle.invalidate();

                assert_eq!(handle.await.unwrap(), LoopExit::Superseded);
                assert_eq!(h.state(), CaptureState::None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_sink_ends_loop() {
        LocalSet::new()
            .run_until(async {
                let (h, handle) = start(Some(ScriptedDetector::new(DetectorScript::default())));
                drop(h.frames);
                assert_eq!(handle.await.unwrap(), LoopExit::StreamEnded);
            })
            .await;
    }
}
