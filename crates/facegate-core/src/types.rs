use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Rescale a box measured on a `from` sized frame onto a `to` sized surface.
    ///
    /// Confidence is carried over unchanged. A zero-sized `from` leaves the box as-is.
    pub fn for_size(&self, from: (u32, u32), to: (u32, u32)) -> BoundingBox {
        if from.0 == 0 || from.1 == 0 || from == to {
            return self.clone();
        }
        let sx = to.0 as f32 / from.0 as f32;
        let sy = to.1 as f32 / from.1 as f32;

        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }
}

/// Face descriptor (embedding) vector, 512-dimensional for ArcFace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum DescriptorParseError {
    #[error("descriptor string is empty")]
    Empty,
    #[error("descriptor value {index} is not a number: {value:?}")]
    InvalidValue { index: usize, value: String },
    #[error("descriptor value {index} is not finite")]
    NonFinite { index: usize },
}

/// Parses a comma-delimited list of numbers, e.g. `"0.12,-0.03,0.5"`.
impl FromStr for Descriptor {
    type Err = DescriptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(DescriptorParseError::Empty);
        }

        let values = s
            .split(',')
            .enumerate()
            .map(|(index, field)| {
                let field = field.trim();
                let value: f32 = field.parse().map_err(|_| DescriptorParseError::InvalidValue {
                    index,
                    value: field.to_string(),
                })?;
                if !value.is_finite() {
                    return Err(DescriptorParseError::NonFinite { index });
                }
                Ok(value)
            })
            .collect::<Result<Vec<f32>, _>>()?;

        Ok(Self { values })
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// A detected face together with the descriptor extracted from it.
#[derive(Debug, Clone)]
pub struct FaceDescription {
    pub face: BoundingBox,
    pub descriptor: Descriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: 0.9, landmarks: None,
        }
    }

    #[test]
    fn test_parse_descriptor() {
        let d: Descriptor = "0.5, -1.25,3".parse().unwrap();
        assert_eq!(d.values, vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn test_parse_descriptor_rejects_garbage() {
        let err = "0.1,abc,0.3".parse::<Descriptor>().unwrap_err();
        assert_eq!(
            err,
            DescriptorParseError::InvalidValue { index: 1, value: "abc".into() }
        );
    }

    #[test]
    fn test_parse_descriptor_rejects_empty_field() {
        assert!("0.1,,0.3".parse::<Descriptor>().is_err());
        assert_eq!("   ".parse::<Descriptor>().unwrap_err(), DescriptorParseError::Empty);
    }

    #[test]
    fn test_parse_descriptor_rejects_nan() {
        let err = "0.1,NaN".parse::<Descriptor>().unwrap_err();
        assert_eq!(err, DescriptorParseError::NonFinite { index: 1 });
    }

    #[test]
    fn test_display_parses_back() {
        let d = Descriptor::new(vec![0.25, -0.5, 1.0]);
        let text = d.to_string();
        assert_eq!(text, "0.25,-0.5,1");
        assert_eq!(text.parse::<Descriptor>().unwrap(), d);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_for_size_scales_box_and_landmarks() {
        let mut b = bbox(10.0, 20.0, 100.0, 50.0);
        b.landmarks = Some([(10.0, 20.0); 5]);
        let scaled = b.for_size((320, 240), (640, 480));
        assert_eq!(scaled.x, 20.0);
        assert_eq!(scaled.y, 40.0);
        assert_eq!(scaled.width, 200.0);
        assert_eq!(scaled.height, 100.0);
        assert_eq!(scaled.confidence, 0.9);
        assert_eq!(scaled.landmarks.unwrap()[0], (20.0, 40.0));
    }

    #[test]
    fn test_for_size_same_size_is_identity() {
        let b = bbox(1.0, 2.0, 3.0, 4.0);
        assert_eq!(b.for_size((640, 480), (640, 480)), b);
        assert_eq!(b.for_size((0, 0), (640, 480)), b);
    }
}
