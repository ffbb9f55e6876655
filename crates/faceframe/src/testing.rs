//! In-crate fakes for the camera and the detector.

use crate::detector::{DetectorLoader, FaceDetector};
use faceframe_core::{BoundingBox, DetectorError};
use faceframe_hw::{CameraError, Frame, StreamConstraints, VideoDevice, VideoTrack};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Read timeout of a stalled [`FakeTrack`].
const STALL_TIMEOUT: Duration = Duration::from_millis(20);

/// Mid-grey RGB frame.
pub(crate) fn test_frame(width: u32, height: u32) -> Frame {
    Frame::from_rgb(vec![128; (width * height * 3) as usize], width, height, 0).unwrap()
}

/// A 160x200 face box centered in a `width` x `height` frame.
pub(crate) fn centered_face(width: u32, height: u32) -> BoundingBox {
    BoundingBox {
        x: width as f32 / 2.0 - 80.0,
        y: height as f32 / 2.0 - 100.0,
        width: 160.0,
        height: 200.0,
        confidence: 0.98,
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// One-shot gate a blocking thread can wait on.
#[derive(Clone, Default)]
pub(crate) struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub(crate) fn release(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let mut released = open.lock().unwrap();
        while !*released {
            released = cvar.wait(released).unwrap();
        }
    }
}

/// Counters shared between a [`FakeDevice`], its tracks and the test.
#[derive(Clone, Default)]
pub(crate) struct DeviceCounters {
    opened: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    held: Arc<AtomicUsize>,
    max_held: Arc<AtomicUsize>,
}

impl DeviceCounters {
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tracks currently playing.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most tracks ever held at once, counting opens still in progress.
    pub(crate) fn max_held(&self) -> usize {
        self.max_held.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        let now = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_held.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct FakeDevice {
    resolution: (u32, u32),
    deny: bool,
    failing_frames: bool,
    stalled: bool,
    open_latch: Option<Latch>,
    pub(crate) counters: DeviceCounters,
}

impl FakeDevice {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            deny: false,
            failing_frames: false,
            stalled: false,
            open_latch: None,
            counters: DeviceCounters::default(),
        }
    }

    /// Every open fails with a permission error.
    pub(crate) fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(640, 480)
        }
    }

    /// Tracks play but every frame read fails.
    pub(crate) fn failing_frames(mut self) -> Self {
        self.failing_frames = true;
        self
    }

    /// Tracks play but never deliver a frame; every read times out.
    pub(crate) fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// `open` blocks until the latch is released.
    pub(crate) fn gated(mut self, latch: Latch) -> Self {
        self.open_latch = Some(latch);
        self
    }
}

impl VideoDevice for FakeDevice {
    type Track = FakeTrack;

    fn open(&self, _constraints: &StreamConstraints) -> Result<FakeTrack, CameraError> {
        self.counters.acquire();
        if let Some(latch) = &self.open_latch {
            latch.wait();
        }
        if self.deny {
            self.counters.release();
            return Err(CameraError::PermissionDenied("/dev/fake0".into()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTrack {
            resolution: self.resolution,
            failing: self.failing_frames,
            stalled: self.stalled,
            playing: false,
            sequence: 0,
            counters: self.counters.clone(),
        })
    }
}

pub(crate) struct FakeTrack {
    resolution: (u32, u32),
    failing: bool,
    stalled: bool,
    playing: bool,
    sequence: u32,
    counters: DeviceCounters,
}

impl VideoTrack for FakeTrack {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn play(&mut self) -> Result<(), CameraError> {
        if !self.playing {
            self.playing = true;
            self.counters.live.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stalled {
            std::thread::sleep(STALL_TIMEOUT);
            return Err(CameraError::FrameTimeout(STALL_TIMEOUT));
        }
        std::thread::sleep(Duration::from_millis(2));
        if !self.playing {
            return Err(CameraError::NotPlaying);
        }
        if self.failing {
            return Err(CameraError::CaptureFailed("sensor unplugged".into()));
        }
        self.sequence += 1;
        let (w, h) = self.resolution;
        let mut frame = test_frame(w, h);
        frame.sequence = self.sequence;
        Ok(frame)
    }

    fn stop(&mut self) {
        if self.playing {
            self.playing = false;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeTrack {
    fn drop(&mut self) {
        self.stop();
        self.counters.release();
    }
}

/// What the scripted detector reports; adjustable from the test while running.
#[derive(Clone, Default)]
pub(crate) struct DetectorScript {
    face: Arc<Mutex<Option<BoundingBox>>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl DetectorScript {
    pub(crate) fn set_face(&self, face: Option<BoundingBox>) {
        *self.face.lock().unwrap() = face;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedDetector {
    script: DetectorScript,
    delay: Duration,
}

impl ScriptedDetector {
    pub(crate) fn new(script: DetectorScript) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FaceDetector for ScriptedDetector {
    async fn detect(&self, _frame: Arc<Frame>) -> Result<Option<BoundingBox>, DetectorError> {
        let s = &self.script;
        s.calls.fetch_add(1, Ordering::SeqCst);
        let now = s.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        s.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        s.in_flight.fetch_sub(1, Ordering::SeqCst);

        if s.failing.load(Ordering::SeqCst) {
            return Err(DetectorError::InferenceFailed("scripted failure".into()));
        }
        Ok(*s.face.lock().unwrap())
    }
}

pub(crate) struct ScriptedLoader {
    script: DetectorScript,
    fail: bool,
    release: Option<Arc<Notify>>,
    loads: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub(crate) fn new(script: DetectorScript) -> Self {
        Self {
            script,
            fail: false,
            release: None,
            loads: Arc::default(),
        }
    }

    pub(crate) fn failing(script: DetectorScript) -> Self {
        Self {
            fail: true,
            ..Self::new(script)
        }
    }

    /// `load` waits for `release` to be notified.
    pub(crate) fn held(mut self, release: Arc<Notify>) -> Self {
        self.release = Some(release);
        self
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DetectorLoader for ScriptedLoader {
    type Detector = ScriptedDetector;

    async fn load(&self) -> Result<ScriptedDetector, DetectorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.release {
            release.notified().await;
        }
        if self.fail {
            return Err(DetectorError::ModelNotFound("/models/det_10g.onnx".into()));
        }
        Ok(ScriptedDetector::new(self.script.clone()))
    }
}
