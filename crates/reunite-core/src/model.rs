//! Face model loading and the shared, lazily-initialized model handle.
//!
//! The host process builds one [`ModelHandle`] and hands clones to every
//! extractor. The first extraction loads the ONNX sessions; that happens at
//! most once per handle, and a failed load is remembered so later calls fail
//! fast instead of reloading weights.

use crate::attributes::AgeEstimator;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, FaceEmbedding};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const AGE_MODEL_FILE: &str = "genderage.onnx";

/// Default directory holding the `buffalo_l` ONNX files.
///
/// `$XDG_DATA_HOME/reunite/models`, falling back to `~/.local/share/reunite/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("reunite/models")
}

/// Locations of the model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    /// Age estimation is optional; `None` skips it.
    pub age: Option<PathBuf>,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path, with_age: bool) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
            age: with_age.then(|| dir.join(AGE_MODEL_FILE)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Model initialization failed; extraction is disabled for this handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("face models unavailable: {reason}")]
pub struct ModelUnavailable {
    reason: String,
}

impl ModelUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Runtime failure while analyzing one image with loaded models.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding failed: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0} session lock poisoned")]
    Poisoned(&'static str),
}

/// The first face found in an image.
#[derive(Debug, Clone)]
pub struct AnalyzedFace {
    pub bbox: BoundingBox,
    pub embedding: FaceEmbedding,
    pub estimated_age: Option<f32>,
}

/// Detection + embedding capability behind a [`ModelHandle`].
pub trait FaceAnalysis: Send + Sync {
    /// Detect faces and embed the first one in detection order, if any.
    fn first_face(&self, image: &RgbImage) -> Result<Option<AnalyzedFace>, AnalysisError>;
}

/// The `buffalo_l` ONNX models.
///
/// ONNX Runtime needs exclusive access to run a session, so each one sits
/// behind its own mutex. The sessions are never replaced after loading.
pub struct OnnxModels {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
    age: Option<Mutex<AgeEstimator>>,
}

impl OnnxModels {
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelError> {
        let detector = FaceDetector::load(&paths.detector)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer)?;
        // The age model never blocks extraction.
        let age = paths.age.as_deref().and_then(|path| match AgeEstimator::load(path) {
            Ok(estimator) => Some(estimator),
            Err(e) => {
                tracing::warn!(error = %e, "age model unavailable; ages will not be estimated");
                None
            }
        });

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            age: age.map(Mutex::new),
        })
    }

    fn estimate_age(&self, image: &RgbImage, face: &BoundingBox) -> Option<f32> {
        let age = self.age.as_ref()?;
        let mut estimator = match age.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("age estimator lock poisoned; skipping age");
                return None;
            }
        };
        match estimator.estimate(image, face) {
            Ok(years) => Some(years),
            Err(e) => {
                tracing::warn!(error = %e, "age estimation failed; continuing without age");
                None
            }
        }
    }
}

impl FaceAnalysis for OnnxModels {
    fn first_face(&self, image: &RgbImage) -> Result<Option<AnalyzedFace>, AnalysisError> {
        let faces = self
            .detector
            .lock()
            .map_err(|_| AnalysisError::Poisoned("detector"))?
            .detect(image)?;

        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };

        let embedding = self
            .recognizer
            .lock()
            .map_err(|_| AnalysisError::Poisoned("recognizer"))?
            .extract(image, &face)?;

        let estimated_age = self.estimate_age(image, &face);

        Ok(Some(AnalyzedFace {
            bbox: face,
            embedding,
            estimated_age,
        }))
    }
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn FaceAnalysis>, ModelError> + Send + Sync>;

struct ModelSlot {
    /// `None` for handles built around an already-loaded model.
    loader: Option<Loader>,
    model: OnceLock<Result<Arc<dyn FaceAnalysis>, ModelUnavailable>>,
}

/// Initialization state reported by [`ModelHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    NotLoaded,
    Ready,
    Unavailable(String),
}

/// Cloneable handle to lazily-initialized face models.
#[derive(Clone)]
pub struct ModelHandle {
    slot: Arc<ModelSlot>,
}

impl ModelHandle {
    /// Handle that loads the ONNX models from `paths` on first use.
    pub fn onnx(paths: ModelPaths) -> Self {
        Self::lazy(move || {
            let models = OnnxModels::load(&paths)?;
            Ok(Arc::new(models) as Arc<dyn FaceAnalysis>)
        })
    }

    /// Handle around an arbitrary loader. The loader runs at most once.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn FaceAnalysis>, ModelError> + Send + Sync + 'static,
    {
        Self {
            slot: Arc::new(ModelSlot {
                loader: Some(Box::new(loader)),
                model: OnceLock::new(),
            }),
        }
    }

    /// Handle around an already-constructed model.
    pub fn ready(model: Arc<dyn FaceAnalysis>) -> Self {
        Self {
            slot: Arc::new(ModelSlot {
                loader: None,
                model: OnceLock::from(Ok(model)),
            }),
        }
    }

    /// Get the loaded models, initializing them on first call.
    ///
    /// Concurrent first calls block on the same initialization. Once it has
    /// failed, every call returns the cached [`ModelUnavailable`].
    pub fn get(&self) -> Result<Arc<dyn FaceAnalysis>, ModelUnavailable> {
        self.slot
            .model
            .get_or_init(|| {
                let Some(loader) = &self.slot.loader else {
                    return Err(ModelUnavailable::new("model handle has no loader"));
                };
                tracing::info!("initializing face models");
                match loader() {
                    Ok(model) => {
                        tracing::info!("face models ready");
                        Ok(model)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "face model initialization failed; extraction disabled");
                        Err(ModelUnavailable::new(e.to_string()))
                    }
                }
            })
            .clone()
    }

    pub fn status(&self) -> ModelStatus {
        match self.slot.model.get() {
            None => ModelStatus::NotLoaded,
            Some(Ok(_)) => ModelStatus::Ready,
            Some(Err(e)) => ModelStatus::Unavailable(e.reason().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoFaces;

    impl FaceAnalysis for NoFaces {
        fn first_face(&self, _image: &RgbImage) -> Result<Option<AnalyzedFace>, AnalysisError> {
            Ok(None)
        }
    }

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/models"), false);
        assert_eq!(paths.detector, PathBuf::from("/models/det_10g.onnx"));
        assert_eq!(paths.recognizer, PathBuf::from("/models/w600k_r50.onnx"));
        assert!(paths.age.is_none());

        let with_age = ModelPaths::in_dir(Path::new("/models"), true);
        assert_eq!(with_age.age, Some(PathBuf::from("/models/genderage.onnx")));
    }

    #[test]
    fn test_lazy_loader_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ModelHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoFaces) as Arc<dyn FaceAnalysis>)
        });

        assert_eq!(handle.status(), ModelStatus::NotLoaded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(handle.get().is_ok());
        assert!(handle.clone().get().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), ModelStatus::Ready);
    }

    #[test]
    fn test_failed_load_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ModelHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::Detector(DetectorError::ModelNotFound("det_10g.onnx".into())))
        });

        let first = handle.get().err().unwrap();
        let second = handle.get().err().unwrap();
        assert_eq!(first, second);
        assert!(first.reason().contains("det_10g.onnx"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(handle.status(), ModelStatus::Unavailable(_)));
    }

    #[test]
    fn test_concurrent_first_use_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ModelHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(NoFaces) as Arc<dyn FaceAnalysis>)
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || h.get().is_ok())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ready_handle_is_loaded() {
        let handle = ModelHandle::ready(Arc::new(NoFaces));
        assert_eq!(handle.status(), ModelStatus::Ready);
        assert!(handle.get().is_ok());
    }

    #[test]
    fn test_onnx_handle_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::onnx(ModelPaths::in_dir(dir.path(), true));
        let err = handle.get().err().unwrap();
        assert!(err.reason().contains(DETECTOR_MODEL_FILE), "{}", err.reason());
    }
}
