use anyhow::{Context, Result};
use facegate_core::OnnxFaceModel;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;
mod shell;

use config::Config;
use dbus_interface::{FaceGateService, BUS_NAME, OBJECT_PATH};
use engine::SessionSettings;
use shell::IdentificationShell;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    let driver = config.driver_settings().context("invalid session configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        device_class = %config.device_class,
        mode = driver.mode.name(),
        "configuration loaded"
    );

    let source = facegate_hw::open_source(&config.camera_device)
        .with_context(|| format!("failed to open frame source {}", config.camera_device))?;

    let model_dir = config.model_dir.clone();
    let device_class = config.device_class;
    let settings = SessionSettings {
        driver,
        tick_interval: Duration::from_millis(config.tick_ms),
        warmup_frames: config.warmup_frames,
        capture_timeout: Duration::from_secs(config.capture_timeout_secs),
    };
    let (engine, engine_thread) = engine::spawn_session(
        source,
        move || OnnxFaceModel::load(&model_dir, device_class),
        settings,
    )?;

    let shell = IdentificationShell::new(engine.clone());
    let mut updates = shell.updates();

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceGateService::new(shell, device_class))?
        .build()
        .await
        .context("failed to register on the session bus")?;

    let signal_conn = conn.clone();
    tokio::spawn(async move {
        let emitter = match SignalEmitter::new(&signal_conn, OBJECT_PATH) {
            Ok(emitter) => emitter,
            Err(e) => {
                tracing::error!(error = %e, "cannot emit detection signals");
                return;
            }
        };
        while let Some(state) = updates.next().await {
            tracing::debug!(%state, "detection changed");
            if let Err(e) = FaceGateService::detection_changed(&emitter, state.as_str()).await {
                tracing::warn!(error = %e, "failed to emit DetectionChanged");
            }
        }
    });

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    engine.shutdown();
    drop(conn);
    tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;

    Ok(())
}
