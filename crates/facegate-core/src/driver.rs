//! Capture/detection driver: classifies frames into a [`DetectionState`].
//!
//! The driver owns no device handles: each tick is handed the frame and the
//! overlay to redraw. State changes are published on a broadcast channel;
//! repeated identical classifications publish nothing.

use crate::classify::{classify_detection, classify_verification, Thresholds};
use crate::model::{FaceModel, ModelError};
use crate::overlay::Overlay;
use crate::state::DetectionState;
use crate::types::{BoundingBox, Descriptor};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("face models are not loaded")]
    NotLoaded,
    #[error("capture requires state success, current state is {0}")]
    NotReady(DetectionState),
    #[error("no face present in the frame")]
    NoFacePresent,
    #[error("reference descriptor has {reference} values, model produces {model}")]
    DescriptorLength { reference: usize, model: usize },
}

/// What each frame is classified against.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Box width and detector score against the thresholds.
    Detection,
    /// Descriptor distance to a reference descriptor.
    Verification { reference: Descriptor },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Verification { .. } => "verification",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub mode: Mode,
    pub thresholds: Thresholds,
    /// Surface size boxes are measured and drawn at. `None` keeps the frame size.
    pub display_size: Option<(u32, u32)>,
}

/// Borrowed grayscale frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> FrameRef<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self { data, width, height }
    }
}

/// Cooperative cancellation flag shared between a session and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands out receivers for the driver's state-change events.
#[derive(Debug, Clone)]
pub struct Subscriptions(broadcast::Sender<DetectionState>);

impl Subscriptions {
    pub fn subscribe(&self) -> broadcast::Receiver<DetectionState> {
        self.0.subscribe()
    }
}

/// Snapshot of the driver for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub mode: &'static str,
    pub state: DetectionState,
    pub models_loaded: bool,
}

pub struct Driver<M> {
    model: Option<M>,
    settings: DriverSettings,
    state: DetectionState,
    events: broadcast::Sender<DetectionState>,
}

impl<M: FaceModel> Driver<M> {
    pub fn new(settings: DriverSettings) -> Self {
        if settings.thresholds.far_score < settings.thresholds.close_score
            && matches!(settings.mode, Mode::Verification { .. })
        {
            tracing::warn!(
                far = settings.thresholds.far_score,
                close = settings.thresholds.close_score,
                "far distance threshold is stricter than close; close state is unreachable"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            model: None,
            settings,
            state: DetectionState::Loading,
            events,
        }
    }

    /// Attach a loaded model. Frames are ignored until this succeeds.
    pub fn attach_model(&mut self, model: M) -> Result<(), DriverError> {
        if let Mode::Verification { reference } = &self.settings.mode {
            if reference.len() != model.descriptor_len() {
                return Err(DriverError::DescriptorLength {
                    reference: reference.len(),
                    model: model.descriptor_len(),
                });
            }
        }
        tracing::info!(params = ?model.params(), mode = self.settings.mode.name(), "face model attached");
        self.model = Some(model);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionState> {
        self.events.subscribe()
    }

    pub fn subscriptions(&self) -> Subscriptions {
        Subscriptions(self.events.clone())
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            mode: self.settings.mode.name(),
            state: self.state,
            models_loaded: self.is_loaded(),
        }
    }

    /// Classify one frame and redraw the overlay.
    ///
    /// Returns `Ok(None)` when the frame was ignored: models not loaded, or
    /// the token was cancelled before or during the model call.
    pub fn tick(
        &mut self,
        frame: FrameRef<'_>,
        overlay: &mut dyn Overlay,
        cancel: &CancelToken,
    ) -> Result<Option<DetectionState>, DriverError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let display = self.display_size(&frame);
        let Some(model) = self.model.as_mut() else {
            return Ok(None);
        };

        let (face, next) = match &self.settings.mode {
            Mode::Detection => {
                let face = model
                    .detect_single(frame.data, frame.width, frame.height)?
                    .map(|f| f.for_size((frame.width, frame.height), display));
                let next = classify_detection(face.as_ref(), &self.settings.thresholds);
                (face, next)
            }
            Mode::Verification { reference } => {
                match model.describe_single(frame.data, frame.width, frame.height)? {
                    Some(found) => {
                        let distance = reference.euclidean_distance(&found.descriptor);
                        tracing::debug!(distance, "verification distance");
                        let next = classify_verification(Some(distance), &self.settings.thresholds);
                        (Some(found.face.for_size((frame.width, frame.height), display)), next)
                    }
                    None => (None, classify_verification(None, &self.settings.thresholds)),
                }
            }
        };

        if cancel.is_cancelled() {
            tracing::debug!("tick abandoned after cancellation");
            return Ok(None);
        }

        self.set_state(next);
        redraw(overlay, face.as_ref(), display, next);
        Ok(Some(next))
    }

    /// Extract the descriptor of the face in `frame`. Only allowed in `Success`.
    pub fn capture_descriptor(&mut self, frame: FrameRef<'_>) -> Result<Descriptor, DriverError> {
        if self.state != DetectionState::Success {
            return Err(DriverError::NotReady(self.state));
        }
        let model = self.model.as_mut().ok_or(DriverError::NotLoaded)?;

        let found = model
            .describe_single(frame.data, frame.width, frame.height)?
            .ok_or(DriverError::NoFacePresent)?;

        tracing::info!(confidence = found.face.confidence, "descriptor captured");
        Ok(found.descriptor)
    }

    fn display_size(&self, frame: &FrameRef<'_>) -> (u32, u32) {
        self.settings.display_size.unwrap_or((frame.width, frame.height))
    }

    fn set_state(&mut self, next: DetectionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "detection state changed");
        self.state = next;
        // Err only means there are no receivers.
        let _ = self.events.send(next);
    }
}

fn redraw(overlay: &mut dyn Overlay, face: Option<&BoundingBox>, display: (u32, u32), state: DetectionState) {
    overlay.clear();
    if let Some(face) = face {
        overlay.resize(display.0, display.1);
        overlay.draw_box(face, state.box_color());
    }
}
