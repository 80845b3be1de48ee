//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over strides 8/16/32 followed by NMS. Input size,
//! score threshold and result count come from [`ForwardParams`], so the same
//! code drives both the light (500M) and full (10G) SCRFD exports.

use crate::forward::ForwardParams;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps letterboxed network coordinates back to frame coordinates.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input_size: usize) -> (Self, usize, usize) {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_size);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_size);
        let pad_x = ((input_size - new_w) / 2) as f32;
        let pad_y = ((input_size - new_h) / 2) as f32;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Raw output slices for one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    params: ForwardParams,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load an SCRFD ONNX model and bind it to the given forward parameters.
    pub fn load(model_path: &Path, params: ForwardParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                output_names.len()
            )));
        }

        let stride_indices = output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            variant = ?params.variant,
            input_size = params.input_size,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            params,
            stride_indices,
        })
    }

    pub fn params(&self) -> &ForwardParams {
        &self.params
    }

    /// Detect faces in a grayscale frame, best first, at most `max_results`.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || frame.len() < expected {
            return Err(DetectorError::InvalidFrame(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                frame.len()
            )));
        }

        let input_size = self.params.input_size;
        let (input, letterbox) = preprocess(frame, width, height, input_size)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(&level, input_size, &letterbox, self.params.score_threshold));
        }

        let mut faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        faces.truncate(self.params.max_results.max(1));
        Ok(faces)
    }

    /// Detect the single most confident face, if any.
    pub fn detect_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<BoundingBox>, DetectorError> {
        Ok(self.detect(frame, width, height)?.into_iter().next())
    }
}

/// Letterbox a grayscale frame into a square NCHW tensor normalized for SCRFD.
fn preprocess(
    frame: &[u8],
    width: u32,
    height: u32,
    input_size: usize,
) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let pixels = (width as usize) * (height as usize);
    let gray = GrayImage::from_raw(width, height, frame[..pixels].to_vec())
        .ok_or_else(|| DetectorError::InvalidFrame("buffer does not match frame size".into()))?;

    let (letterbox, new_w, new_h) = Letterbox::fit(width as usize, height as usize, input_size);
    let resized = imageops::resize(&gray, new_w as u32, new_h as u32, FilterType::Triangle);

    let x0 = letterbox.pad_x as usize;
    let y0 = letterbox.pad_y as usize;

    // Padding stays at 0.0, which is what SCRFD_MEAN normalizes to.
    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    for (x, y, px) in resized.enumerate_pixels() {
        let v = (px.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    Ok((tensor, letterbox))
}

/// Map SCRFD output tensors to stride slots.
///
/// Exports either name tensors `score_8`, `bbox_16`, `kps_32`, ... or use
/// opaque numeric names, in which case the standard order is assumed:
/// scores 8/16/32, then bboxes, then kps.
fn output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match by_name {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode every anchor above `threshold` for one stride level.
fn decode_stride(
    level: &StrideOutputs<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let stride = level.stride as f32;
    let grid = input_size / level.stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    (0..anchors)
        .filter_map(|idx| {
            let score = *level.scores.get(idx)?;
            if score <= threshold {
                return None;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * stride;
            let ay = (cell / grid) as f32 * stride;

            let d = level.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(ax - d[0] * stride, ay - d[1] * stride);
            let (x2, y2) = letterbox.to_frame(ax + d[2] * stride, ay + d[3] * stride);

            let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_frame(ax + k[i * 2] * stride, ay + k[i * 2 + 1] * stride)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by confidence, descending.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        let b = make_bbox(200.0, 200.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let result = nms(
            vec![
                make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let (lb, new_w, new_h) = Letterbox::fit(320, 240, 256);
        assert_eq!(new_w, 256);
        assert_eq!(new_h, 192);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 32.0);

        let (x, y) = lb.to_frame(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 1e-3, "x = {x}");
        assert!((y - 50.0).abs() < 1e-3, "y = {y}");
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let frame = vec![255u8; 64 * 32];
        let (tensor, lb) = preprocess(&frame, 64, 32, 64).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.pad_y, 16.0);
        // Padding row normalizes to zero, image rows to (255 - mean) / std.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 20, 10]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_output_indices_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // 32px input, stride 32 → one cell, two anchors. Only anchor 0 fires.
        let scores = [0.9f32, 0.1];
        let bboxes = [0.25f32, 0.25, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0];
        let kps = [0.0f32; 20];
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let faces = decode_stride(&level, 32, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert!((f.x + 8.0).abs() < 1e-6);
        assert!((f.width - 24.0).abs() < 1e-6);
        assert!((f.confidence - 0.9).abs() < 1e-6);
        assert_eq!(f.landmarks.unwrap()[0], (0.0, 0.0));
    }
}
