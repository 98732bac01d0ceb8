//! Distance functions shared by the query engine and the table backend.
//!
//! Every function yields a *score* where higher means more similar, so the
//! query engine can rank all backends the same way:
//!
//! | function        | score                      |
//! |-----------------|----------------------------|
//! | `cosine`        | cosine similarity `[-1, 1]`|
//! | `inner_product` | raw dot product            |
//! | `euclidean`     | `1 / (1 + l2_distance)`    |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chunk size used to help the compiler auto-vectorize the inner loops.
const SIMD_CHUNK_SIZE: usize = 32;

/// Store-wide distance function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    #[default]
    Cosine,
    Euclidean,
    InnerProduct,
}

impl DistanceFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceFunction::Cosine => "cosine",
            DistanceFunction::Euclidean => "euclidean",
            DistanceFunction::InnerProduct => "inner_product",
        }
    }

    /// Similarity score between two equal-length vectors (higher = closer).
    #[inline]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceFunction::Cosine => cosine_similarity(a, b),
            DistanceFunction::InnerProduct => dot(a, b),
            DistanceFunction::Euclidean => 1.0 / (1.0 + squared_l2(a, b).sqrt()),
        }
    }
}

impl fmt::Display for DistanceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceFunction::Cosine),
            "euclidean" | "l2" => Ok(DistanceFunction::Euclidean),
            "inner_product" | "dot" => Ok(DistanceFunction::InnerProduct),
            other => Err(format!("unknown distance function `{other}`")),
        }
    }
}

/// Dot product, processed in fixed-size chunks.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);

    let mut acc = 0.0f32;
    let mut a_chunks = a.chunks_exact(SIMD_CHUNK_SIZE);
    let mut b_chunks = b.chunks_exact(SIMD_CHUNK_SIZE);
    for (ca, cb) in a_chunks.by_ref().zip(b_chunks.by_ref()) {
        acc += ca.iter().zip(cb).map(|(x, y)| x * y).sum::<f32>();
    }
    acc + a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| x * y)
        .sum::<f32>()
}

/// Cosine similarity; zero-norm inputs score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// In-place L2 normalization. Zero vectors are left untouched.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 0.0 {
        let inv_norm = norm_sq.sqrt().recip();
        for x in v.iter_mut() {
            *x *= inv_norm;
        }
    }
}
