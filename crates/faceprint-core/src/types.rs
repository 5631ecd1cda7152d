use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

const USER_ID_MAX_LEN: usize = 64;

/// Identifier a face record is stored under.
///
/// Clients send either a JSON integer or a string; the original form is kept
/// so responses echo it back unchanged. Both forms map to the same storage
/// key, so `7` and `"7"` address the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid user_id {0:?}: expected an integer or 1-64 characters of [A-Za-z0-9_-]")]
pub struct InvalidUserId(pub String);

impl UserId {
    /// Parse a path segment: canonical integers stay numeric, anything else
    /// (including `007`) must be a safe text identifier.
    pub fn parse(raw: &str) -> Result<Self, InvalidUserId> {
        match raw.parse::<i64>() {
            Ok(n) if n.to_string() == raw => Ok(Self::Number(n)),
            _ => Self::text(raw.to_string()),
        }
    }

    fn text(s: String) -> Result<Self, InvalidUserId> {
        let valid = !s.is_empty()
            && s.len() <= USER_ID_MAX_LEN
            && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self::Text(s))
        } else {
            Err(InvalidUserId(s))
        }
    }

    /// File stem shared by the record's metadata and photo files.
    pub fn file_stem(&self) -> String {
        format!("user_{self}")
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Number(n)),
            Raw::Text(s) => Self::text(s).map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, 0.0 for disjoint or empty boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector. Serialized as a bare JSON array of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance, accumulated in f64. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// A registered face: one per user, persisted as `user_<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub user_id: UserId,
    /// Older records name this field `encoding`.
    #[serde(alias = "encoding")]
    pub embedding: Embedding,
    pub photo_path: PathBuf,
    /// Local wall-clock time, ISO-8601 without offset.
    pub registered_at: NaiveDateTime,
}
