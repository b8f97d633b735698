//! Identification matching over a gallery of canonical-space embeddings.
//!
//! Distances are computed under a configurable metric, gated by an
//! identification threshold, and turned into a bounded confidence by a
//! sigmoid centered on that threshold — so operators can apply a secondary
//! confidence cutoff without retuning anything.

use std::fmt;
use std::str::FromStr;

use crate::error::IdentifyError;
use crate::gallery::Gallery;
use crate::types::{Embedding, UNKNOWN_LABEL};

/// Dissimilarity measure between two canonical embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    EuclideanL2,
    Cosine,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
        DistanceMetric::Cosine,
    ];

    pub fn config_name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Canonical identification threshold, used when no explicit threshold
    /// is configured.
    pub fn default_threshold(&self) -> f32 {
        match self {
            DistanceMetric::Euclidean => 1.1,
            DistanceMetric::EuclideanL2 => 1.1,
            DistanceMetric::Cosine => 0.4,
        }
    }

    /// Distance between two vectors under this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => euclidean(a, b),
            DistanceMetric::EuclideanL2 => {
                let (na, nb) = (l2_normalize(a), l2_normalize(b));
                euclidean(&na, &nb)
            }
            DistanceMetric::Cosine => {
                let mut dot = 0.0f32;
                let mut norm_a = 0.0f32;
                let mut norm_b = 0.0f32;
                for (x, y) in a.iter().zip(b.iter()) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                let denom = norm_a.sqrt() * norm_b.sqrt();
                if denom > 0.0 {
                    1.0 - dot / denom
                } else {
                    1.0
                }
            }
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = IdentifyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.config_name() == name)
            .ok_or_else(|| {
                IdentifyError::Configuration(format!(
                    "distance metric must be one of: 'euclidean', 'euclidean_l2', 'cosine', got '{name}'"
                ))
            })
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Sigmoid confidence calibration: smooth, monotonically decreasing in
/// distance, exactly 0.5 at the threshold.
pub fn sigmoid_confidence(steepness: f32, threshold: f32, distance: f32) -> f32 {
    1.0 / (1.0 + (-steepness * (threshold - distance)).exp())
}

/// Match a probe embedding against the gallery.
///
/// Returns the best label (or [`UNKNOWN_LABEL`] when the best distance
/// exceeds the threshold) plus the calibrated confidence. An empty gallery
/// resolves to `unknown` with confidence 0 rather than failing.
pub fn match_probe(
    probe: &Embedding,
    gallery: &Gallery,
    metric: DistanceMetric,
    threshold: f32,
    steepness: f32,
) -> Result<(String, f32), IdentifyError> {
    if !probe.is_canonical() {
        return Err(IdentifyError::SpaceMismatch {
            expected: "canonical".to_string(),
            actual: probe.space.to_string(),
        });
    }

    let mut best: Option<(&str, f32)> = None;
    for entry in gallery.entries() {
        // Labels degraded to an empty embedding set never match.
        let Some(label_best) = entry
            .embeddings
            .iter()
            .map(|e| metric.distance(&probe.values, &e.values))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };

        if best.map_or(true, |(_, d)| label_best < d) {
            best = Some((&entry.label, label_best));
        }
    }

    let Some((label, distance)) = best else {
        return Ok((UNKNOWN_LABEL.to_string(), 0.0));
    };

    let confidence = sigmoid_confidence(steepness, threshold, distance);
    let label = if distance <= threshold {
        label.to_string()
    } else {
        UNKNOWN_LABEL.to_string()
    };

    Ok((label, confidence))
}
