//! The face-model seam used by the driver, and its ONNX implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::forward::{DeviceClass, ForwardParams};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_DESCRIPTOR_LEN, ARCFACE_MODEL_FILE};
use crate::types::{BoundingBox, FaceDescription};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Single-face detection and description over grayscale frames.
///
/// `&mut self` because inference sessions are stateful.
pub trait FaceModel: Send {
    /// Forward parameters the model was loaded with.
    fn params(&self) -> &ForwardParams;

    /// Length of the descriptors produced by [`describe_single`](Self::describe_single).
    fn descriptor_len(&self) -> usize;

    /// Most confident face in the frame, in frame coordinates.
    fn detect_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<BoundingBox>, ModelError>;

    /// Most confident face plus its descriptor.
    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, ModelError>;
}

impl<M: FaceModel + ?Sized> FaceModel for Box<M> {
    fn params(&self) -> &ForwardParams {
        (**self).params()
    }

    fn descriptor_len(&self) -> usize {
        (**self).descriptor_len()
    }

    fn detect_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<BoundingBox>, ModelError> {
        (**self).detect_single(frame, width, height)
    }

    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, ModelError> {
        (**self).describe_single(frame, width, height)
    }
}

/// Paths of the ONNX files for a device class.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn resolve(model_dir: &Path, params: &ForwardParams) -> Self {
        Self {
            detector: model_dir.join(params.variant.model_file()),
            recognizer: model_dir.join(ARCFACE_MODEL_FILE),
        }
    }
}

/// SCRFD detector + ArcFace recognizer.
pub struct OnnxFaceModel {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceModel {
    /// Load the recognizer and the detector variant selected by `device_class`.
    pub fn load(model_dir: &Path, device_class: DeviceClass) -> Result<Self, ModelError> {
        let params = ForwardParams::for_device(device_class);
        let paths = ModelPaths::resolve(model_dir, &params);
        tracing::info!(
            %device_class,
            detector = %paths.detector.display(),
            recognizer = %paths.recognizer.display(),
            "loading face models"
        );

        let recognizer = FaceRecognizer::load(&paths.recognizer)?;
        let detector = FaceDetector::load(&paths.detector, params)?;

        Ok(Self { detector, recognizer })
    }
}

impl FaceModel for OnnxFaceModel {
    fn params(&self) -> &ForwardParams {
        self.detector.params()
    }

    fn descriptor_len(&self) -> usize {
        ARCFACE_DESCRIPTOR_LEN
    }

    fn detect_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<BoundingBox>, ModelError> {
        Ok(self.detector.detect_single(frame, width, height)?)
    }

    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, ModelError> {
        let Some(face) = self.detector.detect_single(frame, width, height)? else {
            return Ok(None);
        };
        let descriptor = self.recognizer.extract(frame, width, height, &face)?;
        Ok(Some(FaceDescription { face, descriptor }))
    }
}
