//! Identification shell: hosts a verification session and renders its state.
//!
//! Status text and button style describe verification outcomes; in
//! detection mode only the raw state is meaningful.

use crate::engine::{EngineError, EngineHandle};
use facegate_core::{ButtonStyle, Descriptor, DetectionState, DriverSettings, Mode, Thresholds};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Verification thresholds used by the shell.
pub const VERIFY_FAR_SCORE: f32 = 0.60;
pub const VERIFY_CLOSE_SCORE: f32 = 0.50;

#[derive(Clone)]
pub struct IdentificationShell {
    engine: EngineHandle,
    latest: Arc<Mutex<DetectionState>>,
}

impl IdentificationShell {
    /// Driver settings for verifying against `reference`.
    pub fn settings(reference: Descriptor) -> DriverSettings {
        DriverSettings {
            mode: Mode::Verification { reference },
            thresholds: Thresholds {
                far_score: VERIFY_FAR_SCORE,
                close_score: VERIFY_CLOSE_SCORE,
                ..Thresholds::default()
            },
            display_size: None,
        }
    }

    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            latest: Arc::new(Mutex::new(DetectionState::Loading)),
        }
    }

    /// Start following state changes. Each received state is also stored as
    /// the shell's latest state.
    pub fn updates(&self) -> ShellUpdates {
        ShellUpdates {
            rx: self.engine.subscribe(),
            latest: self.latest.clone(),
        }
    }

    pub fn state(&self) -> DetectionState {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status_text(&self) -> &'static str {
        self.state().status_text()
    }

    pub fn button_style(&self) -> ButtonStyle {
        self.state().button_style()
    }

    /// Capture the current face and hand its descriptor to `on_submit`.
    pub async fn capture<F>(&self, on_submit: F) -> Result<(), EngineError>
    where
        F: FnOnce(Descriptor),
    {
        let descriptor = self.engine.capture().await?;
        tracing::info!(len = descriptor.len(), "descriptor captured");
        on_submit(descriptor);
        Ok(())
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

/// Stream of state changes that keeps the shell's latest state current.
pub struct ShellUpdates {
    rx: broadcast::Receiver<DetectionState>,
    latest: Arc<Mutex<DetectionState>>,
}

impl ShellUpdates {
    /// Next state change, or `None` once the session has ended.
    pub async fn next(&mut self) -> Option<DetectionState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => {
                    *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = state;
                    return Some(state);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "state listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
