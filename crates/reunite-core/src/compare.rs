//! Similarity scoring and the match threshold policy.

use crate::types::FaceEmbedding;

/// Default cosine similarity a candidate must exceed to count as a match.
///
/// A tuning default, not a calibrated constant.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.35;

/// Outcome of comparing two optional embeddings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    /// One side had no embedding, or the two came from different models
    /// (dimension mismatch). This is not a low score.
    NotComparable,
    Scored { score: f32, is_match: bool },
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Scored { is_match: true, .. })
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            Comparison::Scored { score, .. } => Some(*score),
            Comparison::NotComparable => None,
        }
    }
}

/// Scores embedding pairs and applies a strict `score > threshold` rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparator {
    threshold: f32,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Comparator {
    /// A non-finite `threshold` is replaced by [`DEFAULT_SIMILARITY_THRESHOLD`].
    pub fn new(threshold: f32) -> Self {
        if !threshold.is_finite() {
            tracing::warn!(threshold = %threshold, "non-finite similarity threshold; using default");
            return Self::default();
        }
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn compare(&self, a: Option<&FaceEmbedding>, b: Option<&FaceEmbedding>) -> Comparison {
        let (Some(a), Some(b)) = (a, b) else {
            return Comparison::NotComparable;
        };
        if a.dim() != b.dim() {
            tracing::debug!(left = a.dim(), right = b.dim(), "embedding dimensions differ");
            return Comparison::NotComparable;
        }

        let score = a.dot(b);
        Comparison::Scored {
            score,
            is_match: score > self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> FaceEmbedding {
        FaceEmbedding::from_raw(values.to_vec()).unwrap()
    }

    #[test]
    fn test_score_is_symmetric() {
        let pairs = [
            (emb(&[0.3, -0.7, 0.2, 0.9]), emb(&[0.1, 0.4, -0.5, 0.8])),
            (emb(&[1.0, 2.0, 3.0]), emb(&[-3.0, 0.5, 1.0])),
        ];
        let c = Comparator::default();
        for (a, b) in &pairs {
            assert_eq!(
                c.compare(Some(a), Some(b)).score(),
                c.compare(Some(b), Some(a)).score()
            );
        }
    }

    #[test]
    fn test_self_similarity_is_maximal() {
        let a = emb(&[0.3, -0.7, 0.2, 0.9, 1.1]);
        let score = Comparator::default().compare(Some(&a), Some(&a)).score().unwrap();
        assert!((score - 1.0).abs() < 1e-5, "self-similarity = {score}");
    }

    #[test]
    fn test_threshold_is_strict() {
        let a = emb(&[0.3, 0.7, 0.2]);
        let b = emb(&[0.5, 0.1, 0.6]);
        let score = a.dot(&b);

        assert!(!Comparator::new(score).compare(Some(&a), Some(&b)).is_match());
        assert!(Comparator::new(score - 1e-4).compare(Some(&a), Some(&b)).is_match());

        let unit = emb(&[1.0, 0.0]);
        let at_one = Comparator::new(1.0).compare(Some(&unit), Some(&unit));
        assert_eq!(at_one, Comparison::Scored { score: 1.0, is_match: false });
    }

    #[test]
    fn test_missing_embedding_is_not_comparable() {
        let a = emb(&[1.0, 0.0]);
        let c = Comparator::default();
        assert_eq!(c.compare(Some(&a), None), Comparison::NotComparable);
        assert_eq!(c.compare(None, Some(&a)), Comparison::NotComparable);
        assert_eq!(c.compare(None, None), Comparison::NotComparable);
        assert_eq!(c.compare(None, None).score(), None);
    }

    #[test]
    fn test_dimension_mismatch_is_not_comparable() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert_eq!(Comparator::default().compare(Some(&a), Some(&b)), Comparison::NotComparable);
    }

    #[test]
    fn test_nan_threshold_uses_default() {
        let c = Comparator::new(f32::NAN);
        assert_eq!(c.threshold(), DEFAULT_SIMILARITY_THRESHOLD);

        let a = emb(&[1.0, 0.0]);
        assert!(c.compare(Some(&a), Some(&a)).is_match());
        assert_eq!(Comparator::new(f32::INFINITY).threshold(), DEFAULT_SIMILARITY_THRESHOLD);
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(Comparator::default().threshold(), 0.35);
    }
}
