//! facegate-core: face proximity and verification engine.
//!
//! Classifies camera frames into a small proximity state (far / close /
//! success) from SCRFD detections or ArcFace descriptor distances, both
//! running via ONNX Runtime behind the [`FaceModel`] seam.

pub mod alignment;
pub mod classify;
pub mod detector;
pub mod driver;
pub mod forward;
pub mod model;
pub mod overlay;
pub mod recognizer;
pub mod state;
pub mod types;

pub use classify::Thresholds;
pub use driver::{CancelToken, Driver, DriverError, DriverSettings, DriverStatus, FrameRef, Mode, Subscriptions};
pub use forward::{DeviceClass, DetectorVariant, ForwardParams};
pub use model::{FaceModel, ModelError, OnnxFaceModel};
pub use overlay::{NullOverlay, Overlay, RasterOverlay};
pub use state::{ButtonStyle, DetectionState};
pub use types::{BoundingBox, Descriptor, DescriptorParseError, FaceDescription};
