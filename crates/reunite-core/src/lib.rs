//! reunite-core: face matching engine for missing-child reports.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime, then scans filed reports for the first one whose
//! reference face is similar enough to an uploaded photo.

pub mod alignment;
pub mod attributes;
pub mod compare;
pub mod detector;
pub mod extractor;
pub mod model;
pub mod recognizer;
pub mod record;
pub mod search;
pub mod types;
pub mod worker;

pub use compare::{Comparator, Comparison, DEFAULT_SIMILARITY_THRESHOLD};
pub use extractor::{ExtractError, Extractor, FaceExtractor};
pub use model::{default_model_dir, ModelHandle, ModelPaths, ModelStatus, ModelUnavailable};
pub use record::{Location, MissingChildRecord, Photo, ReportStatus, ReporterContact, UploadCandidate};
pub use search::{MatchEngine, SearchError, SearchReport, SkipReason, SkippedCandidate, UploadOutcome};
pub use types::{BoundingBox, EmbeddingError, ExtractionResult, FaceEmbedding, MatchDecision};
pub use worker::{ExtractionWorker, DEFAULT_EXTRACT_TIMEOUT};
