//! First-match-wins search over filed reports.
//!
//! Candidates are scanned in the order the caller supplies them, and the
//! scan stops at the first record scoring above the threshold. The result is
//! the first sufficiently similar record, not the most similar one: a later
//! record with a higher score is never examined.

use crate::compare::{Comparator, Comparison};
use crate::extractor::{ExtractError, Extractor};
use crate::record::{MissingChildRecord, PhotoError, UploadCandidate};
use crate::types::{ExtractionResult, FaceEmbedding, MatchDecision};
use std::borrow::Cow;
use thiserror::Error;

/// Why a candidate was left out of matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PhotoMissing,
    PhotoUnreadable(String),
    NoFaceFound,
    ExtractionFailed(String),
    /// Embedding dimension differs from the upload's.
    NotComparable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub record_id: u64,
    pub reason: SkipReason,
}

/// Decision plus what the scan did to reach it.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub decision: MatchDecision,
    /// Candidates visited, including skipped ones and the match itself.
    pub examined: usize,
    pub skipped: Vec<SkippedCandidate>,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search aborted at record {record_id}: {source}")]
    Aborted {
        record_id: u64,
        #[source]
        source: ExtractError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("upload photo: {0}")]
    Photo(#[from] PhotoError),
    #[error("upload extraction: {0}")]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Result of running an upload through extraction and search.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    NoFaceFound,
    Searched(SearchReport),
}

impl UploadOutcome {
    pub fn decision(&self) -> Option<&MatchDecision> {
        match self {
            UploadOutcome::Searched(report) => Some(&report.decision),
            UploadOutcome::NoFaceFound => None,
        }
    }
}

enum CandidateError {
    Skip(SkipReason),
    Fatal(ExtractError),
}

/// Extractor and comparator bound together for matching uploads.
pub struct MatchEngine<E> {
    extractor: E,
    comparator: Comparator,
}

impl<E: Extractor> MatchEngine<E> {
    pub fn new(extractor: E, comparator: Comparator) -> Self {
        Self {
            extractor,
            comparator,
        }
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    /// First candidate, in iteration order, whose similarity to `upload`
    /// exceeds the threshold.
    pub fn find_match<'a, I>(&self, upload: &FaceEmbedding, candidates: I) -> Result<MatchDecision, SearchError>
    where
        I: IntoIterator<Item = &'a MissingChildRecord>,
    {
        self.search(upload, candidates).map(|report| report.decision)
    }

    /// Like [`find_match`](Self::find_match), also reporting skipped candidates.
    ///
    /// Unusable candidates are skipped and the scan continues. Only a failure
    /// that rules out every later extraction (models unavailable, worker
    /// gone) aborts it.
    pub fn search<'a, I>(&self, upload: &FaceEmbedding, candidates: I) -> Result<SearchReport, SearchError>
    where
        I: IntoIterator<Item = &'a MissingChildRecord>,
    {
        let mut examined = 0;
        let mut skipped = Vec::new();

        for record in candidates {
            examined += 1;

            let embedding = match self.candidate_embedding(record) {
                Ok(embedding) => embedding,
                Err(CandidateError::Skip(reason)) => {
                    tracing::debug!(record = record.id, ?reason, "skipping candidate");
                    skipped.push(SkippedCandidate {
                        record_id: record.id,
                        reason,
                    });
                    continue;
                }
                Err(CandidateError::Fatal(source)) => {
                    tracing::error!(record = record.id, error = %source, "search aborted");
                    return Err(SearchError::Aborted {
                        record_id: record.id,
                        source,
                    });
                }
            };

            match self.comparator.compare(Some(upload), Some(&embedding)) {
                Comparison::Scored { score, is_match: true } => {
                    tracing::info!(record = record.id, score, examined, "match found");
                    return Ok(SearchReport {
                        decision: MatchDecision::Matched {
                            record: record.clone(),
                            score,
                        },
                        examined,
                        skipped,
                    });
                }
                Comparison::Scored { score, .. } => {
                    tracing::trace!(record = record.id, score, "below threshold");
                }
                Comparison::NotComparable => {
                    skipped.push(SkippedCandidate {
                        record_id: record.id,
                        reason: SkipReason::NotComparable,
                    });
                }
            }
        }

        tracing::info!(examined, skipped = skipped.len(), "no match found");
        Ok(SearchReport {
            decision: MatchDecision::NoMatch,
            examined,
            skipped,
        })
    }

    /// Extract the upload's face, attach it to `upload`, and search.
    pub fn process_upload<'a, I>(
        &self,
        upload: &mut UploadCandidate,
        candidates: I,
    ) -> Result<UploadOutcome, ProcessError>
    where
        I: IntoIterator<Item = &'a MissingChildRecord>,
    {
        let bytes = upload.photo.load()?;
        let extraction = self.extractor.extract(&bytes)?;

        let (embedding, estimated_age) = match extraction {
            ExtractionResult::Face {
                embedding,
                estimated_age,
            } => (embedding, estimated_age),
            ExtractionResult::NoFaceFound => {
                tracing::info!(upload = %upload.id, "no face in uploaded photo");
                return Ok(UploadOutcome::NoFaceFound);
            }
        };

        upload.estimated_age = estimated_age;
        let embedding = upload.embedding.insert(embedding);
        let report = self.search(embedding, candidates)?;

        Ok(UploadOutcome::Searched(report))
    }

    fn candidate_embedding<'r>(
        &self,
        record: &'r MissingChildRecord,
    ) -> Result<Cow<'r, FaceEmbedding>, CandidateError> {
        if let Some(embedding) = &record.embedding {
            return Ok(Cow::Borrowed(embedding));
        }

        let bytes = record.photo.load().map_err(|e| {
            CandidateError::Skip(match e {
                PhotoError::Missing => SkipReason::PhotoMissing,
                e @ PhotoError::Unreadable { .. } => SkipReason::PhotoUnreadable(e.to_string()),
            })
        })?;

        match self.extractor.extract(&bytes) {
            Ok(ExtractionResult::Face { embedding, .. }) => Ok(Cow::Owned(embedding)),
            Ok(ExtractionResult::NoFaceFound) => Err(CandidateError::Skip(SkipReason::NoFaceFound)),
            Err(e) if e.is_fatal() => Err(CandidateError::Fatal(e)),
            Err(e) => {
                tracing::warn!(record = record.id, error = %e, "candidate extraction failed");
                Err(CandidateError::Skip(SkipReason::ExtractionFailed(e.to_string())))
            }
        }
    }
}
