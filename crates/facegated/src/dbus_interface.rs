use crate::engine::{EngineError, SessionStatus};
use crate::shell::IdentificationShell;
use facegate_core::{DeviceClass, DriverError};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.facegate.FaceGate1";
pub const OBJECT_PATH: &str = "/org/facegate/FaceGate1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.FaceGate1
/// Object path: /org/facegate/FaceGate1
pub struct FaceGateService {
    shell: IdentificationShell,
    device_class: DeviceClass,
}

impl FaceGateService {
    pub fn new(shell: IdentificationShell, device_class: DeviceClass) -> Self {
        Self { shell, device_class }
    }
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Return session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.shell.engine().status().await.map_err(to_fdo)?;
        Ok(status_json(&status, self.device_class, self.shell.status_text()).to_string())
    }

    /// Capture the descriptor of the verified face, comma-delimited.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture requested");
        let mut captured = None;
        self.shell
            .capture(|descriptor| captured = Some(descriptor))
            .await
            .map_err(to_fdo)?;
        captured
            .map(|d| d.to_string())
            .ok_or_else(|| zbus::fdo::Error::Failed("no descriptor captured".into()))
    }

    /// Emitted once per detection state change.
    #[zbus(signal)]
    pub async fn detection_changed(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;
}

/// Status JSON. `status_text` is the verification display text and is null in detection mode.
fn status_json(status: &SessionStatus, device_class: DeviceClass, status_text: &str) -> serde_json::Value {
    let status_text = (status.driver.mode == "verification").then_some(status_text);
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "mode": status.driver.mode,
        "state": status.driver.state,
        "status_text": status_text,
        "models_loaded": status.driver.models_loaded,
        "load_error": status.load_error,
        "device_class": device_class.to_string(),
        "source": status.source,
        "frames": status.frames,
    })
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "request failed");
    match err {
        EngineError::Timeout(_) => zbus::fdo::Error::TimedOut(err.to_string()),
        EngineError::Driver(DriverError::NotReady(_) | DriverError::NoFacePresent) => {
            zbus::fdo::Error::AccessDenied(err.to_string())
        }
        EngineError::ChannelClosed => zbus::fdo::Error::Disconnected(err.to_string()),
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
