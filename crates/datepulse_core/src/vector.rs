//! Typed value objects for the loosely-shaped columns: embedding vectors and
//! per-platform fraction maps. Both are validated when they are constructed,
//! so anything read back from a store has already passed the same checks.

use crate::error::{BreakdownError, VectorError};
use crate::model::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance used when checking that breakdown fractions add up to one.
const BREAKDOWN_TOLERANCE: f64 = 0.01;

/// A fixed-dimension embedding vector.
///
/// The dimension is chosen by the external embedding model; the pipeline only
/// requires that it is non-empty, finite and consistent across items and
/// centroids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, VectorError> {
        if values.is_empty() {
            return Err(VectorError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite { index });
        }
        Ok(Self(values))
    }

    /// Like [`Embedding::new`] but also pins the dimension.
    pub fn with_dimension(values: Vec<f32>, expected: usize) -> Result<Self, VectorError> {
        if values.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
        Self::new(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn cosine(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }

    /// Arithmetic mean of the given vectors.
    ///
    /// Vectors whose dimension differs from the first one are skipped.
    /// Returns `None` when nothing usable was supplied.
    pub fn mean<'a, I>(vectors: I) -> Option<Embedding>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let mut sum: Vec<f64> = first.0.iter().map(|v| *v as f64).collect();
        let mut count = 1usize;

        for vector in iter {
            if vector.dim() != sum.len() {
                tracing::warn!(
                    expected = sum.len(),
                    actual = vector.dim(),
                    "Skipping embedding with mismatched dimension in centroid"
                );
                continue;
            }
            for (acc, v) in sum.iter_mut().zip(&vector.0) {
                *acc += *v as f64;
            }
            count += 1;
        }

        let mean = sum.into_iter().map(|v| (v / count as f64) as f32).collect();
        Embedding::new(mean).ok()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = VectorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}

/// Calculate cosine similarity between two vectors.
/// Returns a value between -1.0 and 1.0 (1.0 = identical direction), and 0.0
/// for empty, zero-norm or length-mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Share of a cluster's members coming from each platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Platform, f64>", into = "BTreeMap<Platform, f64>")]
pub struct SourceBreakdown(BTreeMap<Platform, f64>);

impl SourceBreakdown {
    /// Build fractions from one platform tag per member.
    pub fn from_platforms<I>(platforms: I) -> Self
    where
        I: IntoIterator<Item = Platform>,
    {
        let mut counts: BTreeMap<Platform, u32> = BTreeMap::new();
        let mut total = 0u32;
        for platform in platforms {
            *counts.entry(platform).or_default() += 1;
            total += 1;
        }
        if total == 0 {
            return Self::default();
        }
        Self(
            counts
                .into_iter()
                .map(|(platform, count)| (platform, count as f64 / total as f64))
                .collect(),
        )
    }

    pub fn fraction(&self, platform: Platform) -> f64 {
        self.0.get(&platform).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Platforms ordered by descending share.
    pub fn ranked(&self) -> Vec<(Platform, f64)> {
        let mut entries: Vec<(Platform, f64)> = self.0.iter().map(|(p, f)| (*p, *f)).collect();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        entries
    }
}

impl TryFrom<BTreeMap<Platform, f64>> for SourceBreakdown {
    type Error = BreakdownError;

    fn try_from(map: BTreeMap<Platform, f64>) -> Result<Self, Self::Error> {
        for (platform, value) in &map {
            if !(0.0..=1.0).contains(value) {
                return Err(BreakdownError::OutOfRange {
                    platform: platform.to_string(),
                    value: *value,
                });
            }
        }
        if !map.is_empty() {
            let sum: f64 = map.values().sum();
            if (sum - 1.0).abs() > BREAKDOWN_TOLERANCE {
                return Err(BreakdownError::BadTotal { sum });
            }
        }
        Ok(Self(map))
    }
}

impl From<SourceBreakdown> for BTreeMap<Platform, f64> {
    fn from(breakdown: SourceBreakdown) -> Self {
        breakdown.0
    }
}
