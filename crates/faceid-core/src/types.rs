use serde::{Deserialize, Serialize};

use crate::encoder::EncoderModel;

/// Label reported when no gallery entry lies within the identification
/// threshold, or when the gallery is empty.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A detected face region with its detection score and optional landmarks.
///
/// Coordinates are pixels in the source frame. Scores are percentages
/// (0–100), matching the scale of the configured extraction threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// The geometry an embedding vector lives in.
///
/// Distances are only meaningful between two `Canonical` embeddings; raw
/// encoder spaces are mutually incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingSpace {
    /// Raw output space of one specific encoder network.
    Encoder(EncoderModel),
    /// Shared canonical space produced by the paired translator.
    Canonical,
}

impl std::fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingSpace::Encoder(model) => write!(f, "encoder({model})"),
            EmbeddingSpace::Canonical => write!(f, "canonical"),
        }
    }
}

/// Fixed-length face embedding, tagged with the space that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub space: EmbeddingSpace,
}

impl Embedding {
    pub fn canonical(values: Vec<f32>) -> Self {
        Self {
            values,
            space: EmbeddingSpace::Canonical,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.space == EmbeddingSpace::Canonical
    }
}

/// One identified face in a frame: where it is, who it most likely is, and
/// how confident the match is (0–1, sigmoid-calibrated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub region: FaceRegion,
    pub label: String,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_space_tags() {
        let raw = Embedding {
            values: vec![0.0; 4],
            space: EmbeddingSpace::Encoder(EncoderModel::ArcFace),
        };
        assert!(!raw.is_canonical());
        assert!(Embedding::canonical(vec![0.0; 4]).is_canonical());
    }

    #[test]
    fn test_detection_serializes_flat_region() {
        let det = Detection {
            region: FaceRegion {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0,
                score: 99.0,
                landmarks: None,
            },
            label: "alice".into(),
            confidence: 0.9,
        };
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["x"], 1.0);
        assert_eq!(json["label"], "alice");
    }
}
