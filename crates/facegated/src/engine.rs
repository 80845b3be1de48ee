use facegate_core::{
    CancelToken, DetectionState, Descriptor, Driver, DriverError, DriverSettings, DriverStatus,
    FaceModel, FrameRef, ModelError, NullOverlay, Subscriptions,
};
use facegate_hw::{CameraError, FrameSource};
use serde::Serialize;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Log only every Nth consecutive frame read failure.
const FRAME_ERROR_LOG_EVERY: u64 = 100;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("{0}")]
    Driver(#[from] DriverError),
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub driver: DriverSettings,
    /// Minimum time between two ticks.
    pub tick_interval: Duration,
    pub warmup_frames: usize,
    pub capture_timeout: Duration,
}

/// Session snapshot returned by [`EngineHandle::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub driver: DriverStatus,
    pub source: String,
    pub load_error: Option<String>,
    pub frames: u64,
}

/// Messages sent from handles to the engine thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Clone-safe handle to a running session.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    subscriptions: Subscriptions,
    cancel: CancelToken,
    capture_timeout: Duration,
}

impl EngineHandle {
    /// Capture the descriptor of the face currently in view. Requires state `success`.
    pub async fn capture(&self) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        tokio::time::timeout(self.capture_timeout, reply_rx)
            .await
            .map_err(|_| EngineError::Timeout(self.capture_timeout))?
            .map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Receive every detection state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DetectionState> {
        self.subscriptions.subscribe()
    }

    /// Stop the session. The engine thread exits after its current tick and
    /// drops the frame source, releasing the camera.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Spawn a session on a dedicated OS thread.
///
/// `loader` runs on a separate loader thread while the session keeps
/// answering requests in `loading`. A failed load leaves the session in
/// `loading` with the error visible through [`EngineHandle::status`].
pub fn spawn_session<S, L, M>(
    source: S,
    loader: L,
    settings: SessionSettings,
) -> Result<(EngineHandle, JoinHandle<()>), EngineError>
where
    S: FrameSource + 'static,
    L: FnOnce() -> Result<M, ModelError> + Send + 'static,
    M: FaceModel + 'static,
{
    let driver: Driver<M> = Driver::new(settings.driver.clone());
    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let cancel = CancelToken::new();

    let handle = EngineHandle {
        tx,
        subscriptions: driver.subscriptions(),
        cancel: cancel.clone(),
        capture_timeout: settings.capture_timeout,
    };

    let (model_tx, model_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("facegate-loader".into())
        .spawn(move || {
            let _ = model_tx.send(loader());
        })
        .map_err(EngineError::Spawn)?;

    let session = Session {
        driver,
        source,
        rx,
        cancel,
        pending_model: Some(model_rx),
        load_started: Instant::now(),
        load_error: None,
        frames: 0,
        frame_errors: 0,
    };

    let join = std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || session.run(settings))
        .map_err(EngineError::Spawn)?;

    Ok((handle, join))
}

struct Session<S, M> {
    driver: Driver<M>,
    source: S,
    rx: mpsc::Receiver<EngineRequest>,
    cancel: CancelToken,
    /// Result of the loader thread, until it has been attached.
    pending_model: Option<oneshot::Receiver<Result<M, ModelError>>>,
    load_started: Instant,
    load_error: Option<String>,
    frames: u64,
    frame_errors: u64,
}

impl<S: FrameSource, M: FaceModel> Session<S, M> {
    fn run(mut self, settings: SessionSettings) {
        tracing::info!(source = %self.source.describe(), mode = settings.driver.mode.name(), "engine thread started");

        if settings.warmup_frames > 0 {
            tracing::info!(count = settings.warmup_frames, "discarding warmup frames");
            for _ in 0..settings.warmup_frames {
                let _ = self.source.next_frame();
            }
        }

        while !self.cancel.is_cancelled() {
            let started = Instant::now();

            if !self.drain_requests() {
                tracing::info!("all engine handles dropped");
                break;
            }
            self.poll_model();
            self.tick();

            if let Some(rest) = settings.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        tracing::info!(frames = self.frames, "engine thread exiting");
    }

    /// Attach the model once the loader thread has produced it.
    fn poll_model(&mut self) {
        let Some(pending) = self.pending_model.as_mut() else {
            return;
        };
        let loaded = match pending.try_recv() {
            Ok(loaded) => loaded.map_err(|e| e.to_string()),
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => Err("model loader exited without a result".to_string()),
        };
        self.pending_model = None;

        let attached = loaded.and_then(|model| self.driver.attach_model(model).map_err(|e| e.to_string()));
        match attached {
            Ok(()) => tracing::info!(
                elapsed_ms = self.load_started.elapsed().as_millis() as u64,
                "face models loaded"
            ),
            Err(e) => {
                tracing::error!(error = %e, "failed to load face models; session stays in loading");
                self.load_error = Some(e);
            }
        }
    }

    /// Answer queued requests. Returns false once every handle is gone.
    fn drain_requests(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(EngineRequest::Capture { reply }) => {
                    let _ = reply.send(self.capture());
                }
                Ok(EngineRequest::Status { reply }) => {
                    let _ = reply.send(self.status());
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn tick(&mut self) {
        let frame = match self.source.next_frame() {
            Ok(frame) => {
                self.frame_errors = 0;
                frame
            }
            Err(e) => {
                if self.frame_errors % FRAME_ERROR_LOG_EVERY == 0 {
                    tracing::warn!(error = %e, failures = self.frame_errors + 1, "frame read failed");
                }
                self.frame_errors += 1;
                return;
            }
        };
        self.frames += 1;

        let view = FrameRef::new(&frame.data, frame.width, frame.height);
        if let Err(e) = self.driver.tick(view, &mut NullOverlay, &self.cancel) {
            tracing::warn!(error = %e, seq = frame.sequence, "classification failed");
        }
    }

    fn capture(&mut self) -> Result<Descriptor, EngineError> {
        if self.driver.state() != DetectionState::Success {
            return Err(DriverError::NotReady(self.driver.state()).into());
        }
        let frame = self.source.next_frame()?;
        let view = FrameRef::new(&frame.data, frame.width, frame.height);
        Ok(self.driver.capture_descriptor(view)?)
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            driver: self.driver.status(),
            source: self.source.describe(),
            load_error: self.load_error.clone(),
            frames: self.frames,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facegate_core::{BoundingBox, FaceDescription, ForwardParams, DeviceClass, Mode, Thresholds};
    use facegate_hw::Frame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Frame source yielding blank frames; records when it is dropped.
    pub(crate) struct FakeSource {
        pub dropped: Arc<AtomicBool>,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame::from_gray(vec![128u8; 16], 4, 4, 0)?)
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    /// Model that always reports the face held in `face`.
    pub(crate) struct FakeModel {
        params: ForwardParams,
        pub face: Arc<Mutex<Option<FaceDescription>>>,
    }

    impl FakeModel {
        pub(crate) fn new(face: Option<FaceDescription>) -> (Self, Arc<Mutex<Option<FaceDescription>>>) {
            let shared = Arc::new(Mutex::new(face));
            (
                Self {
                    params: ForwardParams::for_device(DeviceClass::Desktop),
                    face: shared.clone(),
                },
                shared,
            )
        }

        fn current(&self) -> Option<FaceDescription> {
            self.face.lock().unwrap().clone()
        }
    }

    impl FaceModel for FakeModel {
        fn params(&self) -> &ForwardParams {
            &self.params
        }

        fn descriptor_len(&self) -> usize {
            3
        }

        fn detect_single(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<BoundingBox>, ModelError> {
            Ok(self.current().map(|f| f.face))
        }

        fn describe_single(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<FaceDescription>, ModelError> {
            Ok(self.current())
        }
    }

    pub(crate) fn face_with(descriptor: [f32; 3]) -> FaceDescription {
        FaceDescription {
            face: BoundingBox {
                x: 0.0, y: 0.0, width: 2.0, height: 2.0, confidence: 0.99, landmarks: None,
            },
            descriptor: Descriptor::new(descriptor.to_vec()),
        }
    }

    pub(crate) fn settings() -> SessionSettings {
        SessionSettings {
            driver: DriverSettings {
                mode: Mode::Verification {
                    reference: Descriptor::new(vec![0.0, 0.0, 0.0]),
                },
                thresholds: Thresholds::default(),
                display_size: None,
            },
            tick_interval: Duration::from_millis(1),
            warmup_frames: 2,
            capture_timeout: Duration::from_secs(5),
        }
    }

    pub(crate) async fn wait_for_state(handle: &EngineHandle, want: DetectionState) -> SessionStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = handle.status().await.unwrap();
            if status.driver.state == want || Instant::now() > deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_session_reaches_success_and_captures() {
        let dropped = Arc::new(AtomicBool::new(false));
        let (model, _) = FakeModel::new(Some(face_with([0.1, 0.1, 0.1])));
        let (handle, join) =
            spawn_session(FakeSource { dropped: dropped.clone() }, move || Ok(model), settings()).unwrap();

        let status = wait_for_state(&handle, DetectionState::Success).await;
        assert_eq!(status.driver.state, DetectionState::Success);
        assert!(status.driver.models_loaded);
        assert_eq!(status.source, "fake");

        let descriptor = handle.capture().await.unwrap();
        assert_eq!(descriptor.values, vec![0.1, 0.1, 0.1]);

        handle.shutdown();
        join.join().unwrap();
        assert!(dropped.load(Ordering::SeqCst), "frame source must be released on shutdown");
    }

    #[tokio::test]
    async fn test_state_changes_are_broadcast_once() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (model, face) = FakeModel::new(None);
        let loader = move || {
            let _ = gate_rx.recv();
            Ok(model)
        };
        let (handle, join) = spawn_session(
            FakeSource { dropped: Arc::new(AtomicBool::new(false)) },
            loader,
            settings(),
        )
        .unwrap();

        let mut rx = handle.subscribe();
        gate_tx.send(()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, DetectionState::Far);

        *face.lock().unwrap() = Some(face_with([0.0, 0.55, 0.0]));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, DetectionState::Close);

        // Many ticks later, no duplicate events have been queued.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

        handle.shutdown();
        join.join().unwrap();
    }

    #[tokio::test]
    async fn test_status_answers_while_model_loads() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (model, _) = FakeModel::new(None);
        let loader = move || {
            let _ = gate_rx.recv();
            Ok(model)
        };
        let (handle, join) = spawn_session(
            FakeSource { dropped: Arc::new(AtomicBool::new(false)) },
            loader,
            settings(),
        )
        .unwrap();

        let status = tokio::time::timeout(Duration::from_millis(500), handle.status())
            .await
            .expect("status must not wait for the model load")
            .unwrap();
        assert_eq!(status.driver.state, DetectionState::Loading);
        assert!(!status.driver.models_loaded);
        assert!(status.load_error.is_none());

        gate_tx.send(()).unwrap();
        let status = wait_for_state(&handle, DetectionState::Far).await;
        assert_eq!(status.driver.state, DetectionState::Far);
        assert!(status.driver.models_loaded);

        handle.shutdown();
        join.join().unwrap();
    }

    #[tokio::test]
    async fn test_capture_outside_success_is_rejected() {
        let (model, _) = FakeModel::new(Some(face_with([0.0, 0.0, 0.9])));
        let (handle, join) = spawn_session(
            FakeSource { dropped: Arc::new(AtomicBool::new(false)) },
            move || Ok(model),
            settings(),
        )
        .unwrap();

        wait_for_state(&handle, DetectionState::Far).await;
        let err = handle.capture().await.unwrap_err();
        assert!(matches!(err, EngineError::Driver(DriverError::NotReady(DetectionState::Far))));

        handle.shutdown();
        join.join().unwrap();
    }

    #[tokio::test]
    async fn test_load_failure_stays_loading() {
        let loader = || -> Result<FakeModel, ModelError> {
            Err(ModelError::Recognizer(
                facegate_core::recognizer::RecognizerError::ModelNotFound("w600k_r50.onnx".into()),
            ))
        };
        let (handle, join) = spawn_session(
            FakeSource { dropped: Arc::new(AtomicBool::new(false)) },
            loader,
            settings(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.driver.state, DetectionState::Loading);
        assert!(!status.driver.models_loaded);
        assert!(status.load_error.unwrap().contains("w600k_r50.onnx"));
        assert!(status.frames > 0, "frames keep flowing while models are missing");

        let err = handle.capture().await.unwrap_err();
        assert!(matches!(err, EngineError::Driver(DriverError::NotReady(DetectionState::Loading))));

        handle.shutdown();
        join.join().unwrap();
    }

    #[tokio::test]
    async fn test_thread_exits_when_handles_dropped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let (model, _) = FakeModel::new(None);
        let (handle, join) =
            spawn_session(FakeSource { dropped: dropped.clone() }, move || Ok(model), settings()).unwrap();

        drop(handle);
        tokio::task::spawn_blocking(move || join.join().unwrap()).await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }
}
