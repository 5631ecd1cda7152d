//! The detect-and-encode capability the service depends on.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Image → one embedding per detected face, most confident face first.
///
/// Implementations may keep per-call state (ONNX sessions need `&mut`), so
/// callers own the encoder on a single thread.
pub trait FaceEncoder: Send {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError>;
}

/// SCRFD + ArcFace pipeline.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let recognizer_path = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(count = faces.len(), "faces detected");

        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EncoderError::from))
            .collect()
    }
}
