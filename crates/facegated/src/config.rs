use crate::shell::IdentificationShell;
use facegate_core::{Descriptor, DescriptorParseError, DeviceClass, DriverSettings, Mode, Thresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("verification mode requires a reference descriptor")]
    MissingReference,
    #[error("invalid reference descriptor: {0}")]
    Reference(#[from] DescriptorParseError),
}

/// Operating mode as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeName {
    Detection,
    #[default]
    Verification,
}

/// Daemon configuration: defaults, then an optional TOML file, then `FACEGATE_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path, or an image file / directory to replay.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub device_class: DeviceClass,
    pub mode: ModeName,
    /// Comma-delimited reference descriptor (verification mode).
    pub reference_descriptor: Option<String>,
    pub far_dist: f32,
    pub far_score: f32,
    pub close_dist: f32,
    pub close_score: f32,
    /// Surface size used for box measurement; unset keeps the frame size.
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    /// Minimum time between two classification ticks.
    pub tick_ms: u64,
    /// Frames discarded after the source opens (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Upper bound on a capture request.
    pub capture_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            device_class: DeviceClass::default(),
            mode: ModeName::default(),
            reference_descriptor: None,
            far_dist: thresholds.far_dist,
            far_score: thresholds.far_score,
            close_dist: thresholds.close_dist,
            close_score: thresholds.close_score,
            display_width: None,
            display_height: None,
            tick_ms: 10,
            warmup_frames: 4,
            capture_timeout_secs: 10,
        }
    }
}

/// `$XDG_DATA_HOME/facegate/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate/models")
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `FACEGATE_*` overrides read through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DEVICE_CLASS") {
            self.device_class = v.parse().map_err(|message| ConfigError::InvalidValue {
                key: "FACEGATE_DEVICE_CLASS",
                message,
            })?;
        }
        if let Some(v) = lookup("FACEGATE_MODE") {
            self.mode = match v.trim().to_ascii_lowercase().as_str() {
                "detection" => ModeName::Detection,
                "verification" => ModeName::Verification,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "FACEGATE_MODE",
                        message: format!("{other:?} (expected detection or verification)"),
                    })
                }
            };
        }
        if let Some(v) = lookup("FACEGATE_REFERENCE_DESCRIPTOR") {
            self.reference_descriptor = Some(v);
        }

        parse_into(&lookup, "FACEGATE_FAR_DIST", &mut self.far_dist)?;
        parse_into(&lookup, "FACEGATE_FAR_SCORE", &mut self.far_score)?;
        parse_into(&lookup, "FACEGATE_CLOSE_DIST", &mut self.close_dist)?;
        parse_into(&lookup, "FACEGATE_CLOSE_SCORE", &mut self.close_score)?;
        parse_into(&lookup, "FACEGATE_TICK_MS", &mut self.tick_ms)?;
        parse_into(&lookup, "FACEGATE_WARMUP_FRAMES", &mut self.warmup_frames)?;
        parse_into(&lookup, "FACEGATE_CAPTURE_TIMEOUT_SECS", &mut self.capture_timeout_secs)?;

        if let Some(v) = lookup("FACEGATE_DISPLAY_WIDTH") {
            self.display_width = Some(parse_value("FACEGATE_DISPLAY_WIDTH", &v)?);
        }
        if let Some(v) = lookup("FACEGATE_DISPLAY_HEIGHT") {
            self.display_height = Some(parse_value("FACEGATE_DISPLAY_HEIGHT", &v)?);
        }

        Ok(self)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            far_dist: self.far_dist,
            far_score: self.far_score,
            close_dist: self.close_dist,
            close_score: self.close_score,
        }
    }

    /// Driver settings for the configured mode. Parses the reference descriptor once.
    pub fn driver_settings(&self) -> Result<DriverSettings, ConfigError> {
        let base = match self.mode {
            ModeName::Detection => DriverSettings {
                mode: Mode::Detection,
                thresholds: Thresholds::default(),
                display_size: None,
            },
            ModeName::Verification => {
                let text = self
                    .reference_descriptor
                    .as_deref()
                    .ok_or(ConfigError::MissingReference)?;
                IdentificationShell::settings(text.parse::<Descriptor>()?)
            }
        };

        Ok(DriverSettings {
            thresholds: self.thresholds(),
            display_size: self.display_width.zip(self.display_height),
            ..base
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_into<T, F>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}
