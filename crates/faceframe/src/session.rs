//! Camera session: one playing video track feeding a live video sink.
//!
//! The track is blocking, so a dedicated worker thread pulls frames and
//! publishes the latest one on a `watch` channel. Stopping the session joins
//! the worker, which stops the track; dropping the session stops it too.
//! Frame reads time out, so the worker sees the stop flag even when the
//! camera stalls.

use faceframe_hw::{CameraError, Frame, StreamConstraints, VideoDevice, VideoTrack};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;

/// Consecutive capture errors before the worker gives up on the track.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Latest decoded frame; `None` until the first frame arrives.
pub type VideoSink = watch::Receiver<Option<Arc<Frame>>>;

pub struct CameraSession {
    resolution: (u32, u32),
    frames: VideoSink,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CameraSession {
    /// Open a track, start playback, then start feeding the sink.
    ///
    /// Blocking. On error nothing is left running.
    pub fn start<D: VideoDevice>(
        device: &D,
        constraints: &StreamConstraints,
    ) -> Result<Self, CameraError> {
        tracing::info!(
            facing = ?constraints.facing,
            width = constraints.width,
            height = constraints.height,
            "starting camera session"
        );

        let mut track = device.open(constraints)?;
        if let Err(e) = track.play() {
            track.stop();
            return Err(e);
        }
        let resolution = track.resolution();

        let (sink, frames) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = thread::Builder::new()
            .name("faceframe-camera".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || pump_frames(track, sink, stop)
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn camera thread: {e}")))?;

        tracing::info!(width = resolution.0, height = resolution.1, "camera session running");

        Ok(Self {
            resolution,
            frames,
            stop,
            worker: Some(worker),
        })
    }

    /// Native resolution of the track.
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Current frame, if any has arrived.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    /// Subscribe to the video sink. Closes when the worker exits.
    pub fn frames(&self) -> VideoSink {
        self.frames.clone()
    }

    /// Whether the worker is still pulling frames.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the track and join the worker. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if worker.join().is_err() {
            tracing::warn!("camera worker panicked");
        }
        tracing::info!("camera session stopped");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_frames<T: VideoTrack>(
    mut track: T,
    sink: watch::Sender<Option<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
) {
    let mut failures = 0u32;
    while !stop.load(Ordering::Acquire) {
        match track.next_frame() {
            Ok(frame) => {
                failures = 0;
                sink.send_replace(Some(Arc::new(frame)));
            }
            Err(CameraError::FrameTimeout(waited)) => {
                tracing::debug!(?waited, "no frame from camera yet");
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "frame capture failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!("giving up on camera track");
                    break;
                }
            }
        }
    }
    track.stop();
    tracing::debug!("camera worker exiting");
}
