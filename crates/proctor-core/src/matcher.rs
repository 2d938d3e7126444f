//! Identity resolution by cosine similarity against the gallery.

use crate::gallery::Gallery;
use crate::types::Embedding;
use ndarray::ArrayView1;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Default cosine similarity a match must exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.55;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query embedding has a zero or non-finite norm")]
    ZeroNorm,
    #[error("query embedding has {actual} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Resolved identity for one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    /// Best similarity did not exceed the threshold.
    Unknown,
    /// Gallery is not loaded.
    DbError,
}

impl Identity {
    pub fn as_str(&self) -> &str {
        match self {
            Identity::Known(label) => label,
            Identity::Unknown => "UNKNOWN",
            Identity::DbError => "DB_ERROR",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Identity::Unknown)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Identity plus the best cosine similarity found, in [-1, 1].
///
/// For `Unknown` the similarity is the (sub-threshold) best score.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub identity: Identity,
    pub similarity: f32,
}

impl IdentityMatch {
    pub fn db_error() -> Self {
        Self {
            identity: Identity::DbError,
            similarity: 0.0,
        }
    }
}

/// Strategy for resolving a face embedding against the gallery.
pub trait Matcher {
    fn resolve(&self, embedding: &Embedding, gallery: &Gallery) -> Result<IdentityMatch, MatchError>;
}

/// Cosine similarity matcher over the gallery's pre-normalized rows.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for CosineMatcher {
    fn resolve(&self, embedding: &Embedding, gallery: &Gallery) -> Result<IdentityMatch, MatchError> {
        let Some(normalized) = gallery.normalized() else {
            return Ok(IdentityMatch::db_error());
        };

        if embedding.len() != gallery.dimension() {
            return Err(MatchError::DimensionMismatch {
                expected: gallery.dimension(),
                actual: embedding.len(),
            });
        }

        let norm = embedding.norm();
        if !norm.is_finite() || norm == 0.0 {
            return Err(MatchError::ZeroNorm);
        }

        let query = ArrayView1::from(embedding.values.as_slice()).mapv(|v| (f64::from(v) / norm) as f32);
        let similarities = normalized.dot(&query);

        // Ties keep the first row reaching the maximum.
        let mut best_idx = 0usize;
        let mut best_sim = f32::NEG_INFINITY;
        for (i, &sim) in similarities.iter().enumerate() {
            if sim > best_sim {
                best_sim = sim;
                best_idx = i;
            }
        }
        let similarity = best_sim.clamp(-1.0, 1.0);

        let identity = if similarity > self.threshold {
            Identity::Known(gallery.labels()[best_idx].clone())
        } else {
            Identity::Unknown
        };

        tracing::trace!(%identity, similarity, "resolved identity");

        Ok(IdentityMatch {
            identity,
            similarity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn gallery() -> Gallery {
        Gallery::from_parts(
            array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec!["alice".into(), "bob".into(), "carol".into()],
        )
        .unwrap()
    }

    fn sample(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_exact_match() {
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let m = CosineMatcher::default().resolve(&sample(&[1.0, 0.0]), &g).unwrap();
        assert_eq!(m.identity, Identity::Known("alice".into()));
        assert!((m.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_is_unknown() {
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let m = CosineMatcher::default().resolve(&sample(&[0.0, 1.0]), &g).unwrap();
        assert_eq!(m.identity, Identity::Unknown);
        assert!(m.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_best_of_many() {
        let m = CosineMatcher::default().resolve(&sample(&[0.1, 0.2, 0.9]), &gallery()).unwrap();
        assert_eq!(m.identity.as_str(), "carol");
    }

    #[test]
    fn test_scale_invariant() {
        let g = gallery();
        let matcher = CosineMatcher::default();
        let a = matcher.resolve(&sample(&[0.3, 0.9, 0.1]), &g).unwrap();
        let b = matcher.resolve(&sample(&[3.0, 9.0, 1.0]), &g).unwrap();
        let c = matcher.resolve(&sample(&[0.003, 0.009, 0.001]), &g).unwrap();
        assert_eq!(a.identity, b.identity);
        assert_eq!(a.identity, c.identity);
        assert!((a.similarity - b.similarity).abs() < 1e-5);
        assert!((a.similarity - c.similarity).abs() < 1e-5);
    }

    #[test]
    fn test_scale_invariant_at_float_extremes() {
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let matcher = CosineMatcher::default();
        let base = matcher.resolve(&sample(&[0.6, 0.8]), &g).unwrap();
        assert_eq!(base.identity, Identity::Known("alice".into()));

        for k in [1e-25_f32, 1e20] {
            let m = matcher.resolve(&sample(&[0.6 * k, 0.8 * k]), &g).unwrap();
            assert_eq!(m.identity, base.identity, "k = {k}");
            assert!((m.similarity - base.similarity).abs() < 1e-5, "k = {k}");
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        // cos(query, alice) == 0.6 exactly for (0.6, 0.8).
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let p = sample(&[0.6, 0.8]);

        let above = CosineMatcher::new(0.59).resolve(&p, &g).unwrap();
        assert_eq!(above.identity, Identity::Known("alice".into()));

        let at = CosineMatcher::new(above.similarity).resolve(&p, &g).unwrap();
        assert_eq!(at.identity, Identity::Unknown);
        assert_eq!(at.similarity, above.similarity);
    }

    #[test]
    fn test_unknown_reports_sub_threshold_score() {
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let m = CosineMatcher::new(0.9).resolve(&sample(&[0.6, 0.8]), &g).unwrap();
        assert_eq!(m.identity, Identity::Unknown);
        assert!((m.similarity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_bounded() {
        let g = gallery();
        for p in [[1.0, 1.0, 1.0], [-1.0, 0.0, 0.0], [1e-20, 0.0, 0.0], [-5.0, -5.0, -5.0]] {
            let m = CosineMatcher::default().resolve(&sample(&p), &g).unwrap();
            assert!((-1.0..=1.0).contains(&m.similarity), "similarity {}", m.similarity);
        }
    }

    #[test]
    fn test_opposite_vector() {
        let g = Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap();
        let m = CosineMatcher::default().resolve(&sample(&[-2.0, 0.0]), &g).unwrap();
        assert_eq!(m.identity, Identity::Unknown);
        assert!((m.similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unready_gallery_is_db_error() {
        let g = Gallery::unavailable("not loaded");
        for p in [vec![1.0, 0.0], vec![0.0, 0.0], vec![]] {
            let m = CosineMatcher::default().resolve(&Embedding::new(p), &g).unwrap();
            assert_eq!(m.identity, Identity::DbError);
            assert_eq!(m.similarity, 0.0);
        }
    }

    #[test]
    fn test_zero_norm_rejected() {
        let err = CosineMatcher::default().resolve(&sample(&[0.0, 0.0, 0.0]), &gallery()).unwrap_err();
        assert_eq!(err, MatchError::ZeroNorm);
    }

    #[test]
    fn test_nan_rejected() {
        let err = CosineMatcher::default()
            .resolve(&sample(&[f32::NAN, 0.0, 0.0]), &gallery())
            .unwrap_err();
        assert_eq!(err, MatchError::ZeroNorm);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = CosineMatcher::default().resolve(&sample(&[1.0, 0.0]), &gallery()).unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { expected: 3, actual: 2 });
    }

    #[test]
    fn test_identity_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Identity::Unknown).unwrap(), "\"UNKNOWN\"");
        assert_eq!(serde_json::to_string(&Identity::DbError).unwrap(), "\"DB_ERROR\"");
        assert_eq!(serde_json::to_string(&Identity::Known("al".into())).unwrap(), "\"al\"");
    }
}
