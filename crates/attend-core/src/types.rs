use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: candidate has {candidate}, reference has {reference}")]
    DimensionMismatch { candidate: usize, reference: usize },
}

/// Face embedding vector (128-dimensional for the usual dlib-style extractors).
///
/// Stored as a plain numeric sequence so distances can be computed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the vector is non-empty and every component is finite.
    pub fn is_well_formed(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean (L2) distance between two embeddings of equal length.
    ///
    /// Always processes every dimension. Smaller = more similar.
    pub fn distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                candidate: self.values.len(),
                reference: other.values.len(),
            });
        }

        // Accumulate in f64, report f32.
        let sum: f64 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum();

        Ok(sum.sqrt() as f32)
    }
}

/// Inclusive threshold decision: a distance exactly at the threshold is a match.
pub fn is_match(distance: f32, threshold: f32) -> bool {
    distance <= threshold
}

/// Outcome of comparing a candidate against one enrolled reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// L2 distance between candidate and reference.
    pub distance: f32,
}

/// Strategy for comparing a candidate embedding against an enrolled reference.
pub trait Matcher {
    fn compare(
        &self,
        candidate: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean distance matcher under a single global threshold.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidate: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let distance = candidate.distance(reference)?;
        Ok(MatchResult {
            matched: is_match(distance, threshold),
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let v = emb(&[0.1, -0.2, 0.3, 0.4]);
        assert_eq!(v.distance(&v).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = emb(&[0.5, 0.25, -1.0]);
        let b = emb(&[-0.5, 0.75, 2.0]);
        assert_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap());
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[1.0, 2.0]);
        assert_eq!(
            a.distance(&b),
            Err(MatchError::DimensionMismatch { candidate: 3, reference: 2 })
        );
    }

    #[test]
    fn test_is_match_inclusive_boundary() {
        assert!(is_match(0.6, 0.6));
        assert!(is_match(0.0, 0.6));
        assert!(!is_match(0.600_001, 0.6));
    }

    #[test]
    fn test_euclidean_matcher_same_face() {
        let stored = emb(&[0.1; 128]);
        let result = EuclideanMatcher.compare(&stored, &stored, 0.6).unwrap();
        assert!(result.matched);
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_euclidean_matcher_far_face() {
        let stored = emb(&[0.1; 128]);
        let candidate = emb(&[0.9; 128]);
        let result = EuclideanMatcher.compare(&candidate, &stored, 0.6).unwrap();
        assert!(!result.matched);
        assert!(result.distance > 0.6);
    }

    #[test]
    fn test_well_formed() {
        assert!(emb(&[0.0, 1.0]).is_well_formed());
        assert!(!emb(&[]).is_well_formed());
        assert!(!emb(&[f32::NAN, 1.0]).is_well_formed());
        assert!(!emb(&[f32::INFINITY]).is_well_formed());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let json = serde_json::to_string(&emb(&[0.5, -1.0])).unwrap();
        assert_eq!(json, "[0.5,-1.0]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, emb(&[0.5, -1.0]));
    }
}
