//! Capture surface: the open/close lifecycle around one guided capture.
//!
//! The surface runs on its own thread with a current-thread runtime and a
//! `LocalSet`; every task it starts (model gate, camera startup, detection
//! loop, viewport flushes) shares that one scheduler. Callers drive it through
//! a cloneable [`SurfaceHandle`] and observe it through `watch` channels.
//!
//! Opening bumps the epoch and starts: gate, then camera, then loop. Closing,
//! committing or reopening drops the [`Running`] value (loop aborted, camera
//! stopped) and bumps the epoch, so startup work still in flight resolves into
//! a no-op. Camera startups are serialized: a reopen waits until a superseded
//! start has finished and released the device.

use crate::capture::{self, CaptureError, CapturedImage};
use crate::config::SurfaceConfig;
use crate::detection::{DetectionLoop, LoopExit};
use crate::detector::DetectorLoader;
use crate::gate;
use crate::lifecycle::Lifecycle;
use crate::session::CameraSession;
use crate::viewport::ViewportTracker;
use faceframe_core::{CaptureState, Controls, GuideGeometry, GuideTone, TransitionError, ViewportDims};
use faceframe_hw::{Frame, VideoDevice};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinHandle, LocalSet};

/// Grace period for blocking startup work when the surface thread exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type CommitCallback = Box<dyn FnOnce(CapturedImage) + Send>;

/// What the caller supplies when opening the surface.
pub struct OpenOptions {
    title: Option<String>,
    on_commit: CommitCallback,
}

impl OpenOptions {
    /// `on_commit` receives the photo if, and only if, the user commits it.
    pub fn new(on_commit: impl FnOnce(CapturedImage) + Send + 'static) -> Self {
        Self {
            title: None,
            on_commit: Box::new(on_commit),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Lifecycle of the surface as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceStatus {
    Closed,
    /// Waiting on the face detector.
    Preparing,
    /// Waiting on the camera.
    Starting,
    /// Streaming. `degraded` when the detector failed to load.
    Running { degraded: bool },
    /// Camera failure, with a message fit for the user.
    Failed(String),
}

impl SurfaceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SurfaceStatus::Running { .. })
    }
}

/// Everything a front end needs to render the surface.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceView {
    pub title: Option<String>,
    pub state: CaptureState,
    pub status: SurfaceStatus,
    pub viewport: ViewportDims,
    pub guide: GuideGeometry,
    pub controls: Controls,
    pub tone: GuideTone,
    pub hint: &'static str,
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("capture surface is not open")]
    NotOpen,
    #[error("camera is not running")]
    NotRunning,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("failed to start surface thread: {0}")]
    Spawn(std::io::Error),
    #[error("surface thread exited")]
    ChannelClosed,
}

/// Messages sent from handles to the surface thread.
enum Request {
    Open {
        options: OpenOptions,
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Resize {
        dims: ViewportDims,
        reply: oneshot::Sender<()>,
    },
    Capture {
        reply: oneshot::Sender<Result<(), SurfaceError>>,
    },
    Retake {
        reply: oneshot::Sender<Result<(), SurfaceError>>,
    },
    Commit {
        reply: oneshot::Sender<Result<(), SurfaceError>>,
    },
    View {
        reply: oneshot::Sender<SurfaceView>,
    },
    Preview {
        reply: oneshot::Sender<Option<Arc<Frame>>>,
    },
}

/// Clone-safe handle to the surface thread. The surface closes once every
/// handle is dropped.
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::Sender<Request>,
    state: watch::Receiver<CaptureState>,
    status: watch::Receiver<SurfaceStatus>,
    viewport: watch::Receiver<ViewportDims>,
}

impl SurfaceHandle {
    /// Open the surface, replacing any activation already open.
    ///
    /// Returns once startup has been scheduled; follow [`Self::status`] for
    /// its progress.
    pub async fn open(&self, options: OpenOptions) -> Result<(), SurfaceError> {
        self.call(|reply| Request::Open { options, reply }).await
    }

    /// Close the surface without committing. Idempotent.
    pub async fn close(&self) -> Result<(), SurfaceError> {
        self.call(|reply| Request::Close { reply }).await
    }

    /// Report the rendered size of the capture frame.
    pub async fn resize(&self, width: u32, height: u32) -> Result<(), SurfaceError> {
        let dims = ViewportDims::new(width, height);
        self.call(|reply| Request::Resize { dims, reply }).await
    }

    /// Take the photo. Only allowed while the face is in the guide.
    pub async fn capture(&self) -> Result<(), SurfaceError> {
        self.call(|reply| Request::Capture { reply }).await?
    }

    /// Discard the held photo and resume the live preview.
    pub async fn retake(&self) -> Result<(), SurfaceError> {
        self.call(|reply| Request::Retake { reply }).await?
    }

    /// Hand the held photo to the caller's callback and close.
    pub async fn commit(&self) -> Result<(), SurfaceError> {
        self.call(|reply| Request::Commit { reply }).await?
    }

    pub async fn view(&self) -> Result<SurfaceView, SurfaceError> {
        self.call(|reply| Request::View { reply }).await
    }

    /// Frame to display: the frozen still while captured, else the live frame.
    pub async fn preview_frame(&self) -> Result<Option<Arc<Frame>>, SurfaceError> {
        self.call(|reply| Request::Preview { reply }).await
    }

    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    pub fn status(&self) -> watch::Receiver<SurfaceStatus> {
        self.status.clone()
    }

    pub fn viewport(&self) -> watch::Receiver<ViewportDims> {
        self.viewport.clone()
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, SurfaceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| SurfaceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SurfaceError::ChannelClosed)
    }
}

/// Spawn the capture surface on a dedicated OS thread.
///
/// Nothing is opened until [`SurfaceHandle::open`]; the detector and the
/// camera are prepared per activation.
pub fn spawn_surface<D, L>(
    device: D,
    loader: L,
    config: SurfaceConfig,
) -> Result<SurfaceHandle, SurfaceError>
where
    D: VideoDevice,
    L: DetectorLoader + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SurfaceError::Spawn)?;

    let (tx, rx) = mpsc::channel::<Request>(8);
    let (state_tx, state) = watch::channel(CaptureState::None);
    let (status_tx, status) = watch::channel(SurfaceStatus::Closed);
    let (viewport_tx, viewport) = watch::channel(config.default_viewport);

    std::thread::Builder::new()
        .name("faceframe-surface".into())
        .spawn(move || {
            tracing::info!("surface thread started");
            let local = LocalSet::new();
            let surface = Surface::new(device, loader, config, state_tx, status_tx, viewport_tx);
            local.block_on(&runtime, surface.run(rx));
            drop(local);
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            tracing::info!("surface thread exiting");
        })
        .map_err(SurfaceError::Spawn)?;

    Ok(SurfaceHandle {
        tx,
        state,
        status,
        viewport,
    })
}

/// State reachable from the surface's background tasks.
struct Shared<D, L> {
    device: Arc<D>,
    loader: L,
    config: SurfaceConfig,
    lifecycle: Rc<Lifecycle>,
    status: watch::Sender<SurfaceStatus>,
    running: RefCell<Option<Running>>,
    /// Held from camera startup until its session is installed or dropped,
    /// so a reopen never opens the device while a superseded start is in flight.
    camera: Mutex<()>,
}

impl<D, L> Shared<D, L> {
    fn set_status(&self, status: SurfaceStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::debug!(status = ?*self.status.borrow(), "surface status changed");
        }
    }
}

/// A started camera session and the loop reading it. Dropping it aborts the
/// loop task and stops the camera.
struct Running {
    session: CameraSession,
    detection: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.detection.abort();
        self.session.stop();
    }
}

/// One open/close cycle.
struct Activation {
    epoch: u64,
    title: Option<String>,
    on_commit: CommitCallback,
    held: Option<Held>,
}

/// The captured photo, and the frame it was encoded from for the frozen preview.
struct Held {
    image: CapturedImage,
    still: Arc<Frame>,
}

struct Surface<D, L> {
    shared: Rc<Shared<D, L>>,
    viewport: ViewportTracker,
    activation: Option<Activation>,
}

impl<D, L> Surface<D, L>
where
    D: VideoDevice,
    L: DetectorLoader + 'static,
{
    fn new(
        device: D,
        loader: L,
        config: SurfaceConfig,
        state: watch::Sender<CaptureState>,
        status: watch::Sender<SurfaceStatus>,
        viewport: watch::Sender<ViewportDims>,
    ) -> Self {
        let viewport = ViewportTracker::new(viewport, config.frame_interval());
        Self {
            shared: Rc::new(Shared {
                device: Arc::new(device),
                loader,
                config,
                lifecycle: Rc::new(Lifecycle::new(state)),
                status,
                running: RefCell::new(None),
                camera: Mutex::new(()),
            }),
            viewport,
            activation: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(req) = rx.recv().await {
            match req {
                Request::Open { options, reply } => {
                    self.open(options);
                    let _ = reply.send(());
                }
                Request::Close { reply } => {
                    self.teardown();
                    let _ = reply.send(());
                }
                Request::Resize { dims, reply } => {
                    self.viewport.notify(dims);
                    let _ = reply.send(());
                }
                Request::Capture { reply } => {
                    let _ = reply.send(self.capture());
                }
                Request::Retake { reply } => {
                    let _ = reply.send(self.retake());
                }
                Request::Commit { reply } => {
                    let _ = reply.send(self.commit());
                }
                Request::View { reply } => {
                    let _ = reply.send(self.view());
                }
                Request::Preview { reply } => {
                    let _ = reply.send(self.preview());
                }
            }
        }
        tracing::info!("all surface handles dropped");
        self.teardown();
    }

    fn open(&mut self, options: OpenOptions) {
        self.release();

        let epoch = self.shared.lifecycle.begin();
        self.shared.set_status(SurfaceStatus::Preparing);
        tracing::info!(epoch, title = ?options.title, "capture surface opened");

        tokio::task::spawn_local(start_activation(
            Rc::clone(&self.shared),
            self.viewport.subscribe(),
            epoch,
        ));

        self.activation = Some(Activation {
            epoch,
            title: options.title,
            on_commit: options.on_commit,
            held: None,
        });
    }

    /// Release everything and report the surface closed. Safe when closed.
    fn teardown(&mut self) {
        self.release();
        self.shared.set_status(SurfaceStatus::Closed);
    }

    /// Release everything the current activation holds.
    fn release(&mut self) {
        self.shared.lifecycle.invalidate();
        let running = self.shared.running.borrow_mut().take();
        drop(running);
        self.shared.lifecycle.reset();

        if let Some(activation) = self.activation.take() {
            tracing::info!(epoch = activation.epoch, "capture surface closed");
        }
    }

    fn capture(&mut self) -> Result<(), SurfaceError> {
        let activation = self.activation.as_mut().ok_or(SurfaceError::NotOpen)?;
        let state = self.shared.lifecycle.state();
        if state != CaptureState::Ready {
            return Err(TransitionError::NotReady(state).into());
        }

        let frame = self
            .shared
            .running
            .borrow()
            .as_ref()
            .map(|running| running.session.latest_frame());
        let frame = frame
            .ok_or(SurfaceError::NotRunning)?
            .ok_or(CaptureError::NoFrame)?;
        let image = capture::encode_still(&frame, self.shared.config.jpeg_quality())?;
        self.shared.lifecycle.capture()?;

        tracing::info!(
            width = frame.width,
            height = frame.height,
            bytes = image.len(),
            "photo captured"
        );
        activation.held = Some(Held { image, still: frame });
        Ok(())
    }

    fn retake(&mut self) -> Result<(), SurfaceError> {
        let activation = self.activation.as_mut().ok_or(SurfaceError::NotOpen)?;
        self.shared.lifecycle.retake()?;
        activation.held = None;
        tracing::info!("photo discarded; resuming live preview");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SurfaceError> {
        let state = self.shared.lifecycle.state();
        let held = self
            .activation
            .as_mut()
            .ok_or(SurfaceError::NotOpen)?
            .held
            .take()
            .ok_or(TransitionError::NotCaptured(state))?;
        let activation = self.activation.take().ok_or(SurfaceError::NotOpen)?;

        tracing::info!(bytes = held.image.len(), "committing captured photo");
        (activation.on_commit)(held.image);
        self.teardown();
        Ok(())
    }

    fn view(&self) -> SurfaceView {
        let state = self.shared.lifecycle.state();
        let viewport = self.viewport.current();
        SurfaceView {
            title: self.activation.as_ref().and_then(|a| a.title.clone()),
            state,
            status: self.shared.status.borrow().clone(),
            viewport,
            guide: GuideGeometry::for_viewport(viewport),
            controls: state.controls(),
            tone: state.tone(),
            hint: state.hint(),
        }
    }

    fn preview(&self) -> Option<Arc<Frame>> {
        if let Some(held) = self.activation.as_ref().and_then(|a| a.held.as_ref()) {
            return Some(Arc::clone(&held.still));
        }
        self.shared
            .running
            .borrow()
            .as_ref()
            .and_then(|running| running.session.latest_frame())
    }
}

/// Gate, then camera, then loop, for the activation `epoch`.
async fn start_activation<D, L>(
    shared: Rc<Shared<D, L>>,
    viewport: watch::Receiver<ViewportDims>,
    epoch: u64,
) where
    D: VideoDevice,
    L: DetectorLoader + 'static,
{
    let outcome = gate::prepare(&shared.loader).await;
    if !shared.lifecycle.is_current(epoch) {
        tracing::debug!(epoch, "discarding detector from superseded activation");
        return;
    }
    let degraded = !outcome.is_ready();
    let detector = outcome.into_detector();
    shared.set_status(SurfaceStatus::Starting);

    // A superseded start still holds the camera until its session is dropped.
    let _camera = shared.camera.lock().await;
    if !shared.lifecycle.is_current(epoch) {
        tracing::debug!(epoch, "activation superseded while waiting for the camera");
        return;
    }

    let device = Arc::clone(&shared.device);
    let constraints = shared.config.constraints();
    let started =
        tokio::task::spawn_blocking(move || CameraSession::start(device.as_ref(), &constraints)).await;

    if !shared.lifecycle.is_current(epoch) {
        tracing::debug!(epoch, "discarding camera session from superseded activation");
        drop(started);
        return;
    }
    let session = match started {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "camera failed to start");
            shared.set_status(SurfaceStatus::Failed(e.to_string()));
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "camera startup task failed");
            shared.set_status(SurfaceStatus::Failed(format!("camera startup failed: {e}")));
            return;
        }
    };

    let detection = DetectionLoop {
        detector,
        frames: session.frames(),
        viewport,
        lifecycle: Rc::clone(&shared.lifecycle),
        epoch,
        tick: shared.config.frame_interval(),
    };
    let watcher = Rc::clone(&shared);
    let detection = tokio::task::spawn_local(async move {
        if detection.run().await == LoopExit::StreamEnded && watcher.lifecycle.is_current(epoch) {
            tracing::warn!(epoch, "camera stream ended");
            watcher.set_status(SurfaceStatus::Failed("camera stream ended".into()));
            if watcher.lifecycle.state() != CaptureState::Captured {
                watcher.lifecycle.reset();
            }
            let running = watcher.running.borrow_mut().take();
            drop(running);
        }
    });

    *shared.running.borrow_mut() = Some(Running { session, detection });
    shared.set_status(SurfaceStatus::Running { degraded });
    tracing::info!(epoch, degraded, "capture surface running");
}
