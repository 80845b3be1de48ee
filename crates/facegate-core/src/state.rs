use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proximity / verification state of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    /// Models not loaded yet, or no frame classified since loading.
    #[default]
    Loading,
    Far,
    Close,
    Success,
}

/// Overlay box color for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxColor {
    pub name: &'static str,
    pub rgb: [u8; 3],
}

/// Button style used by the identification status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    Default,
    Danger,
    Success,
}

impl DetectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Far => "far",
            Self::Close => "close",
            Self::Success => "success",
        }
    }

    pub fn box_color(&self) -> BoxColor {
        match self {
            Self::Loading => BoxColor { name: "gray", rgb: [128, 128, 128] },
            Self::Far => BoxColor { name: "red", rgb: [255, 0, 0] },
            Self::Close => BoxColor { name: "yellow", rgb: [255, 255, 0] },
            Self::Success => BoxColor { name: "lightgreen", rgb: [144, 238, 144] },
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Loading => "Loading...",
            Self::Far | Self::Close => "Unable To Verify",
            Self::Success => "Verified!",
        }
    }

    pub fn button_style(&self) -> ButtonStyle {
        match self {
            Self::Loading => ButtonStyle::Default,
            Self::Far | Self::Close => ButtonStyle::Danger,
            Self::Success => ButtonStyle::Success,
        }
    }
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(Self::Loading),
            "far" => Ok(Self::Far),
            "close" => Ok(Self::Close),
            "success" => Ok(Self::Success),
            other => Err(format!("unknown detection state {other:?}")),
        }
    }
}
