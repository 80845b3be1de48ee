//! Threshold classification of a single frame's model output.

use crate::state::DetectionState;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Far / close cutoffs.
///
/// In detection mode `*_dist` is a minimum box width in display pixels and
/// `*_score` a minimum detector confidence. In verification mode only the
/// `*_score` fields are used, as maximum descriptor distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub far_dist: f32,
    pub far_score: f32,
    pub close_dist: f32,
    pub close_score: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            far_dist: 0.0,
            far_score: 0.60,
            close_dist: 0.0,
            close_score: 0.50,
        }
    }
}

/// Classify a detection-mode result. `face` must already be in display coordinates.
pub fn classify_detection(face: Option<&BoundingBox>, thresholds: &Thresholds) -> DetectionState {
    let Some(face) = face else {
        return DetectionState::Far;
    };

    if face.width < thresholds.far_dist || face.confidence < thresholds.far_score {
        DetectionState::Far
    } else if face.width < thresholds.close_dist || face.confidence < thresholds.close_score {
        DetectionState::Close
    } else {
        DetectionState::Success
    }
}

/// Classify a verification-mode descriptor distance.
///
/// A non-finite distance is never accepted.
pub fn classify_verification(distance: Option<f32>, thresholds: &Thresholds) -> DetectionState {
    let Some(distance) = distance else {
        return DetectionState::Far;
    };

    if !distance.is_finite() || distance > thresholds.far_score {
        DetectionState::Far
    } else if distance > thresholds.close_score {
        DetectionState::Close
    } else {
        DetectionState::Success
    }
}
