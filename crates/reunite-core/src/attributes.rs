//! Age estimation with the InsightFace `genderage` model.
//!
//! The model takes a 96×96 box-centered crop with raw pixel values and emits
//! `[female, male, age / 100]`. Only the age head is used.

use crate::alignment;
use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GENDERAGE_INPUT_SIZE: u32 = 96;
// The model normalizes internally (bn_data), so input is raw 0..255.
const GENDERAGE_MEAN: f32 = 0.0;
const GENDERAGE_STD: f32 = 1.0;
const GENDERAGE_AGE_INDEX: usize = 2;
const GENDERAGE_AGE_SCALE: f32 = 100.0;

#[derive(Error, Debug)]
pub enum AgeEstimatorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct AgeEstimator {
    session: Session,
}

impl AgeEstimator {
    pub fn load(model_path: &Path) -> Result<Self, AgeEstimatorError> {
        if !model_path.exists() {
            return Err(AgeEstimatorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded genderage model");

        Ok(Self { session })
    }

    /// Estimate the age in years of a detected face.
    pub fn estimate(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<f32, AgeEstimatorError> {
        let crop = alignment::crop_centered(image, face, GENDERAGE_INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, pred) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AgeEstimatorError::InferenceFailed(format!("genderage output: {e}")))?;

        decode_age(pred)
    }
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = GENDERAGE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = (value as f32 - GENDERAGE_MEAN) / GENDERAGE_STD;
        }
    }
    tensor
}

fn decode_age(pred: &[f32]) -> Result<f32, AgeEstimatorError> {
    let raw = pred.get(GENDERAGE_AGE_INDEX).copied().ok_or_else(|| {
        AgeEstimatorError::InferenceFailed(format!(
            "expected at least {} outputs, got {}",
            GENDERAGE_AGE_INDEX + 1,
            pred.len()
        ))
    })?;
    Ok((raw * GENDERAGE_AGE_SCALE).round().max(0.0))
}
