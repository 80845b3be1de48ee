use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    CancelToken, DetectionState, DeviceClass, Driver, DriverSettings, FaceModel, FrameRef, Mode,
    OnnxFaceModel, RasterOverlay, Thresholds,
};
use facegate_hw::{Camera, Frame, FrameSource};
use futures_util::StreamExt;
use image::RgbaImage;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.facegate.FaceGate1",
    default_service = "org.facegate.FaceGate1",
    default_path = "/org/facegate/FaceGate1"
)]
trait FaceGate {
    async fn status(&self) -> zbus::Result<String>;
    async fn capture(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn detection_changed(&self, state: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face proximity and verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Capture the descriptor of the verified face
    Capture,
    /// Print each detection state change
    Watch,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device or image path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to discard before measuring
        #[arg(long, default_value_t = 4)]
        warmup: usize,
        /// Save the captured frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Model directory; classifies the frame and draws the detection box
        #[arg(short, long)]
        models: Option<PathBuf>,
        /// Detector size class used with --models
        #[arg(long, default_value = "desktop")]
        device_class: DeviceClass,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect().await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Capture => {
            let proxy = connect().await?;
            let descriptor = proxy.capture().await.context("capture failed")?;
            println!("{descriptor}");
        }
        Commands::Watch => {
            let proxy = connect().await?;
            watch(&proxy).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { device, warmup, output, models, device_class } => {
            camera_test(&device, warmup, output, models, device_class)?;
        }
    }

    Ok(())
}

async fn connect() -> Result<FaceGateProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    FaceGateProxy::new(&conn)
        .await
        .context("facegated is not reachable; is the daemon running?")
}

/// Print the current state, then every `DetectionChanged` signal.
async fn watch(proxy: &FaceGateProxy<'_>) -> Result<()> {
    // Subscribe before reading status so no change falls in between.
    let mut changes = proxy.receive_detection_changed().await?;

    let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
    let verification = status["mode"] == "verification";
    if let Some(state) = status["state"].as_str() {
        println!("{}", state_line(state, verification));
    }

    while let Some(signal) = changes.next().await {
        let args = signal.args()?;
        println!("{}", state_line(args.state(), verification));
    }
    Ok(())
}

/// State name, followed by the verification status text in verification mode.
fn state_line(state: &str, verification: bool) -> String {
    match state.parse::<DetectionState>() {
        Ok(parsed) if verification => format!("{state:<8} {}", parsed.status_text()),
        _ => state.to_string(),
    }
}

fn camera_test(
    device: &str,
    warmup: usize,
    output: Option<PathBuf>,
    models: Option<PathBuf>,
    device_class: DeviceClass,
) -> Result<()> {
    println!("Running camera diagnostics on {device}...");
    let mut source = facegate_hw::open_source(device)?;
    println!("Opened {}", source.describe());

    for _ in 0..warmup {
        let _ = source.next_frame();
    }
    let frame = source.next_frame()?;
    println!(
        "Frame {}x{} seq={} brightness={:.1} dark={}",
        frame.width,
        frame.height,
        frame.sequence,
        frame.avg_brightness(),
        frame.is_dark
    );

    let annotated = match models {
        Some(dir) => {
            let model = OnnxFaceModel::load(&dir, device_class)
                .with_context(|| format!("failed to load models from {}", dir.display()))?;
            let (state, image) = annotate(model, &frame)?;
            println!("Detection: {state} ({})", state.box_color().name);
            image
        }
        None => RasterOverlay::new(frame.width, frame.height).composite(&gray_image(&frame)?),
    };

    if let Some(path) = output {
        tracing::debug!(path = %path.display(), "writing frame");
        annotated
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved {}", path.display());
    }

    Ok(())
}

fn gray_image(frame: &Frame) -> Result<image::GrayImage> {
    frame
        .to_image()
        .context("frame buffer does not match its dimensions")
}

/// Classify one frame in detection mode and draw the state-colored box over it.
fn annotate<M: FaceModel>(model: M, frame: &Frame) -> Result<(DetectionState, RgbaImage)> {
    let mut driver = Driver::new(DriverSettings {
        mode: Mode::Detection,
        thresholds: Thresholds::default(),
        display_size: None,
    });
    driver.attach_model(model)?;

    let mut overlay = RasterOverlay::new(frame.width, frame.height);
    let view = FrameRef::new(&frame.data, frame.width, frame.height);
    let state = driver
        .tick(view, &mut overlay, &CancelToken::new())?
        .unwrap_or(DetectionState::Loading);

    Ok((state, overlay.composite(&gray_image(frame)?)))
}
