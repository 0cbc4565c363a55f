//! Embedding extraction: image bytes in, first-face embedding out.

use crate::model::{AnalysisError, ModelHandle, ModelUnavailable};
use crate::types::ExtractionResult;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image could not be decoded: {0}")]
    DecodeFailure(#[from] image::ImageError),
    #[error(transparent)]
    ModelUnavailable(#[from] ModelUnavailable),
    #[error("face analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("extraction timed out after {0:?}")]
    TimedOut(Duration),
    #[error("extraction worker stopped")]
    WorkerStopped,
}

impl ExtractError {
    /// True when no further extraction can succeed in this process, as
    /// opposed to a failure local to one image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractError::ModelUnavailable(_) | ExtractError::WorkerStopped)
    }
}

/// Turns encoded image bytes into an [`ExtractionResult`].
///
/// "No face" is a successful `NoFaceFound`, distinct from a decode failure.
/// Implementations run a single pass and never retry.
pub trait Extractor {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError>;
}

impl<E: Extractor + ?Sized> Extractor for &E {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError> {
        (**self).extract(image)
    }
}

impl<E: Extractor + ?Sized> Extractor for Box<E> {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError> {
        (**self).extract(image)
    }
}

impl<E: Extractor + ?Sized> Extractor for Arc<E> {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError> {
        (**self).extract(image)
    }
}

/// Extractor backed by the shared face models.
#[derive(Clone)]
pub struct FaceExtractor {
    model: ModelHandle,
}

impl FaceExtractor {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Extract from an already-decoded image.
    pub fn extract_image(&self, image: &RgbImage) -> Result<ExtractionResult, ExtractError> {
        let model = self.model.get()?;

        let result = match model.first_face(image)? {
            Some(face) => {
                tracing::debug!(
                    confidence = face.bbox.confidence,
                    age = ?face.estimated_age,
                    "face extracted"
                );
                ExtractionResult::Face {
                    embedding: face.embedding,
                    estimated_age: face.estimated_age,
                }
            }
            None => {
                tracing::debug!(width = image.width(), height = image.height(), "no face detected");
                ExtractionResult::NoFaceFound
            }
        };

        Ok(result)
    }
}

impl Extractor for FaceExtractor {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError> {
        // Decode before touching the model: a bad upload never triggers a load.
        let decoded = image::load_from_memory(image)?.to_rgb8();
        self.extract_image(&decoded)
    }
}
