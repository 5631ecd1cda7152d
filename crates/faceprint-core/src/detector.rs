//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image into the 640x640 model input, decodes the three
//! anchor-free stride heads, and suppresses overlapping boxes.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0} (expected SCRFD det_10g.onnx)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the source image inside the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    fn resized_dims(&self, width: u32, height: u32) -> (u32, u32) {
        let w = (width as f32 * self.scale).round().max(1.0) as u32;
        let h = (height as f32 * self.scale).round().max(1.0) as u32;
        (w.min(SCRFD_INPUT_SIZE), h.min(SCRFD_INPUT_SIZE))
    }

    /// Map a point from model-input space back to source image space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [HeadOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                output_names.len()
            )));
        }

        let heads = map_head_outputs(&output_names);
        tracing::info!(path = model_path, outputs = ?output_names, ?heads, "loaded SCRFD model");

        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.heads.iter().zip(SCRFD_STRIDES.iter()) {
            let (_, scores) = outputs[head.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[head.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[head.kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("landmarks stride {stride}: {e}")))?;

            candidates.extend(decode_head(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(non_max_suppression(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox the image into a normalized NCHW RGB tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let letterbox = Letterbox::fit(width, height);
    let (new_w, new_h) = letterbox.resized_dims(width, height);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding is zero after normalization, i.e. the mean value.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let off_x = letterbox.pad_x as usize;
    let off_y = letterbox.pad_y as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Locate each stride's score/bbox/kps tensors.
///
/// Exports that name their outputs `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name; anything else uses the reference positional layout
/// (scores 0-2, boxes 3-5, landmarks 6-8).
fn map_head_outputs(names: &[String]) -> [HeadOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| -> Option<HeadOutputs> {
        Some(HeadOutputs {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(8), by_name(16), by_name(32)) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => {
            tracing::debug!(?names, "SCRFD outputs unnamed, using positional layout");
            std::array::from_fn(|i| HeadOutputs { score: i, bbox: i + 3, kps: i + 6 })
        }
    }
}

/// Decode one stride head into source-space boxes above the confidence threshold.
fn decode_head(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let d = bboxes.get(i * 4..i * 4 + 4)?;
            let (x1, y1) = letterbox.to_source(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.to_source(ax + d[2] * step, ay + d[3] * step);

            let landmarks = kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| letterbox.to_source(ax + k[p * 2] * step, ay + k[p * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS: keep the most confident box, drop everything overlapping it.
/// Output is sorted by descending confidence.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = non_max_suppression(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_keeps_disjoint_and_handles_empty() {
        let result = non_max_suppression(
            vec![bbox(0.0, 0.0, 10.0, 10.0, 0.6), bbox(50.0, 50.0, 10.0, 10.0, 0.8)],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].confidence, 0.8);
        assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.to_source(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_pads_with_zero_and_keeps_channels() {
        let image = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 128]));
        let (tensor, _) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);

        // Top padding band.
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        // Image area, channel order preserved.
        let r = tensor[[0, 0, 320, 320]];
        let g = tensor[[0, 1, 320, 320]];
        assert!((r - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
        assert!((g - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
    }

    #[test]
    fn test_map_head_outputs_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let heads = map_head_outputs(&names);
        assert_eq!(heads[0], HeadOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], HeadOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_head_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        let heads = map_head_outputs(&names);
        assert_eq!(heads[1], HeadOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_head_single_anchor() {
        let stride = 32;
        let grid = 640 / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Anchor in cell (row 2, col 3), second anchor of the cell.
        let idx = (2 * grid + 3) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_head(&scores, &bboxes, &kps, stride, &lb);
        assert_eq!(dets.len(), 1);

        let d = &dets[0];
        assert_eq!((d.x, d.y), (96.0 - 32.0, 64.0 - 32.0));
        assert_eq!((d.width, d.height), (64.0, 64.0));
        assert_eq!(d.landmarks.unwrap()[0], (96.0, 64.0));
    }
}
