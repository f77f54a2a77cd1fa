//! Vector similarity measures used by the reranker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide similarity measure, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMeasure {
    /// Normalized dot product, in [-1, 1]
    #[default]
    Cosine,
    /// Raw dot product, unbounded
    Dot,
}

impl SimilarityMeasure {
    /// Score two vectors under this measure.
    ///
    /// Vectors of unequal length are compared over their common prefix.
    /// A zero-norm vector has cosine similarity 0.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMeasure::Cosine => cosine_similarity(a, b),
            SimilarityMeasure::Dot => dot_product(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMeasure::Cosine => "cosine",
            SimilarityMeasure::Dot => "dot",
        }
    }
}

impl fmt::Display for SimilarityMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / denom
}
