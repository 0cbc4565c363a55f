use crate::record::MissingChildRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

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
    /// Center point of the box in image coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has no dimensions")]
    Empty,
    #[error("embedding value at index {0} is not finite")]
    NonFinite(usize),
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding byte length {0} is not a multiple of 4")]
    ByteLength(usize),
}

/// L2-normalized face embedding (512-dimensional for ArcFace w600k_r50).
///
/// Normalization happens once, at construction, so comparison is a plain
/// inner product. Deserialization goes through [`FaceEmbedding::from_raw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEmbedding", into = "RawEmbedding")]
pub struct FaceEmbedding {
    values: Vec<f32>,
    model_version: Option<String>,
}

impl FaceEmbedding {
    /// Build an embedding from raw model output, L2-normalizing it.
    pub fn from_raw(raw: Vec<f32>) -> Result<Self, EmbeddingError> {
        if raw.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(idx) = raw.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite(idx));
        }

        // Accumulate in f64: squares of large f32 components overflow f32.
        let norm = raw.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
        if !norm.is_finite() || norm <= f64::from(f32::EPSILON) {
            return Err(EmbeddingError::ZeroNorm);
        }

        Ok(Self {
            values: raw.into_iter().map(|x| (f64::from(x) / norm) as f32).collect(),
            model_version: None,
        })
    }

    /// Decode the little-endian `f32` layout produced by [`to_le_bytes`](Self::to_le_bytes).
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::ByteLength(bytes.len()));
        }
        let raw = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_raw(raw)
    }

    /// Raw little-endian `f32` bytes, the form stored on an upload record.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    /// Inner product with another embedding. Both sides are unit vectors, so
    /// this is their cosine similarity in [-1, 1].
    pub fn dot(&self, other: &FaceEmbedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// Serialized form of [`FaceEmbedding`].
#[derive(Serialize, Deserialize)]
struct RawEmbedding {
    values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
}

impl TryFrom<RawEmbedding> for FaceEmbedding {
    type Error = EmbeddingError;

    fn try_from(raw: RawEmbedding) -> Result<Self, Self::Error> {
        let embedding = FaceEmbedding::from_raw(raw.values)?;
        Ok(match raw.model_version {
            Some(v) => embedding.with_model_version(v),
            None => embedding,
        })
    }
}

impl From<FaceEmbedding> for RawEmbedding {
    fn from(e: FaceEmbedding) -> Self {
        Self {
            values: e.values,
            model_version: e.model_version,
        }
    }
}

/// Outcome of running the extractor over one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// The image decoded but contained no detectable face.
    NoFaceFound,
    /// The first detected face.
    Face {
        embedding: FaceEmbedding,
        /// Estimated age in years, when an age model is loaded.
        estimated_age: Option<f32>,
    },
}

impl ExtractionResult {
    pub fn embedding(&self) -> Option<&FaceEmbedding> {
        match self {
            ExtractionResult::Face { embedding, .. } => Some(embedding),
            ExtractionResult::NoFaceFound => None,
        }
    }
}

/// Result of searching the report gallery for an upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchDecision {
    NoMatch,
    /// First record whose similarity exceeded the threshold.
    /// `score` is always strictly greater than the threshold in effect.
    Matched {
        record: MissingChildRecord,
        score: f32,
    },
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Matched { .. })
    }

    pub fn record(&self) -> Option<&MissingChildRecord> {
        match self {
            MatchDecision::Matched { record, .. } => Some(record),
            MatchDecision::NoMatch => None,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            MatchDecision::Matched { score, .. } => Some(*score),
            MatchDecision::NoMatch => None,
        }
    }
}
