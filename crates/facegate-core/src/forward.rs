//! Detector forward parameters, resolved once from the device class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of device the session runs on. Selects the detector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(Self::Mobile),
            "desktop" => Ok(Self::Desktop),
            other => Err(format!("unknown device class {other:?} (expected mobile or desktop)")),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        })
    }
}

/// SCRFD model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorVariant {
    /// SCRFD-500M: small and fast, lower recall on small faces.
    Light,
    /// SCRFD-10G: full-size detector.
    Full,
}

impl DetectorVariant {
    /// ONNX file name inside the model directory.
    pub fn model_file(&self) -> &'static str {
        match self {
            Self::Light => "det_500m.onnx",
            Self::Full => "det_10g.onnx",
        }
    }
}

/// Detector configuration passed on every detect call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForwardParams {
    pub variant: DetectorVariant,
    /// Square network input size in pixels (multiple of 32).
    pub input_size: usize,
    /// Minimum detection confidence.
    pub score_threshold: f32,
    /// Maximum number of faces kept after NMS.
    pub max_results: usize,
}

impl ForwardParams {
    /// Forward parameters for a device class. Pure: same class, same params.
    pub const fn for_device(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Mobile => Self {
                variant: DetectorVariant::Light,
                input_size: 256,
                score_threshold: 0.5,
                max_results: 1,
            },
            DeviceClass::Desktop => Self {
                variant: DetectorVariant::Full,
                input_size: 640,
                score_threshold: 0.5,
                max_results: 1,
            },
        }
    }
}
