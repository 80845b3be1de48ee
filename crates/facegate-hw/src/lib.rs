//! facegate-hw: frame acquisition.
//!
//! V4L2 camera capture, still-image replay, and the [`FrameSource`] seam the
//! session engine reads frames through.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{open_source, FrameSource, StillImageSource};
