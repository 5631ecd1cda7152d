//! faceprint-core: face embeddings, matching and ONNX face encoding.
//!
//! The [`FaceEncoder`] trait is the seam between the service and the model:
//! [`OnnxFaceEncoder`] runs SCRFD detection and ArcFace recognition via ONNX
//! Runtime, tests substitute their own implementation.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use decode::{decode_base64_image, DecodeError};
pub use detector::FaceDetector;
pub use encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, FaceRecord, InvalidUserId, UserId};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/faceprint/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("faceprint")
        .join("models")
}
