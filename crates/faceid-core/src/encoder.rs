//! Closed registry of face embedding networks and the session wrapper that
//! runs them.
//!
//! Each encoder defines its own input geometry, value normalization and
//! embedding dimensionality; the spaces they emit are mutually
//! incompatible until translated (see [`crate::translator`]).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};

use crate::error::IdentifyError;
use crate::providers::preferred_execution_providers;
use crate::types::{Embedding, EmbeddingSpace};

/// A pretrained face embedding network. The set is fixed; unknown names are
/// rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderModel {
    ArcFace,
    Facenet,
    Facenet512,
    SFace,
}

impl EncoderModel {
    pub const ALL: [EncoderModel; 4] = [
        EncoderModel::ArcFace,
        EncoderModel::Facenet,
        EncoderModel::Facenet512,
        EncoderModel::SFace,
    ];

    /// The name this encoder carries in configuration.
    pub fn config_name(&self) -> &'static str {
        match self {
            EncoderModel::ArcFace => "ArcFace",
            EncoderModel::Facenet => "Facenet",
            EncoderModel::Facenet512 => "Facenet512",
            EncoderModel::SFace => "SFace",
        }
    }

    /// Square input resolution of the network.
    pub fn input_size(&self) -> u32 {
        match self {
            EncoderModel::ArcFace | EncoderModel::SFace => 112,
            EncoderModel::Facenet | EncoderModel::Facenet512 => 160,
        }
    }

    /// Dimensionality of the raw embedding this network emits.
    pub fn embedding_dim(&self) -> usize {
        match self {
            EncoderModel::ArcFace | EncoderModel::Facenet512 => 512,
            EncoderModel::Facenet | EncoderModel::SFace => 128,
        }
    }

    /// Per-channel mean on the post-normalization (0–1) value scale.
    pub fn mean(&self) -> [f32; 3] {
        match self {
            EncoderModel::ArcFace => [0.5, 0.5, 0.5],
            EncoderModel::Facenet | EncoderModel::Facenet512 => [0.485, 0.456, 0.406],
            EncoderModel::SFace => [0.0, 0.0, 0.0],
        }
    }

    /// Per-channel std on the post-normalization (0–1) value scale.
    pub fn std(&self) -> [f32; 3] {
        match self {
            EncoderModel::ArcFace => [0.5, 0.5, 0.5],
            EncoderModel::Facenet | EncoderModel::Facenet512 => [0.229, 0.224, 0.225],
            EncoderModel::SFace => [0.5, 0.5, 0.5],
        }
    }

    /// Checkpoint file name under the model directory.
    pub fn checkpoint(&self) -> &'static str {
        match self {
            EncoderModel::ArcFace => "w600k_r50.onnx",
            EncoderModel::Facenet => "facenet_vggface2.onnx",
            EncoderModel::Facenet512 => "facenet512_vggface2.onnx",
            EncoderModel::SFace => "face_recognition_sface_2021dec.onnx",
        }
    }

    /// The frozen translator checkpoint paired with this encoder.
    pub fn translator_checkpoint(&self) -> &'static str {
        match self {
            EncoderModel::ArcFace => "pdt_arcface.onnx",
            EncoderModel::Facenet => "pdt_facenet.onnx",
            EncoderModel::Facenet512 => "pdt_facenet512.onnx",
            EncoderModel::SFace => "pdt_sface.onnx",
        }
    }

    fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|m| format!("'{}'", m.config_name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for EncoderModel {
    type Err = IdentifyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.config_name() == name)
            .ok_or_else(|| {
                IdentifyError::Configuration(format!(
                    "face embedding model (encoder) must be one of: {}, got '{name}'",
                    Self::supported_names()
                ))
            })
    }
}

impl fmt::Display for EncoderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// Face encoder bound to one model's session.
///
/// Weights are loaded once at configuration time on the process-wide
/// preferred device and reused read-only by every call.
pub struct FaceEncoder {
    session: Session,
    model: EncoderModel,
}

impl FaceEncoder {
    /// Load the encoder's ONNX checkpoint from the given path.
    pub fn load(model: EncoderModel, model_path: &Path) -> Result<Self, IdentifyError> {
        if !model_path.exists() {
            return Err(IdentifyError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            model = %model,
            path = %model_path.display(),
            dim = model.embedding_dim(),
            "loaded face encoder"
        );

        Ok(Self { session, model })
    }

    pub fn model(&self) -> EncoderModel {
        self.model
    }

    /// Run one forward pass over a prepared NCHW crop and return the raw
    /// embedding, tagged with this encoder's space.
    pub fn encode(&mut self, input: &Array4<f32>) -> Result<Embedding, IdentifyError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            IdentifyError::InferenceFailed(format!("embedding extraction: {e}"))
        })?;

        let expected = self.model.embedding_dim();
        if raw.len() != expected {
            return Err(IdentifyError::InferenceFailed(format!(
                "expected {expected}-dim embedding from {}, got {}",
                self.model,
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
            space: EmbeddingSpace::Encoder(self.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_config_names() {
        for model in EncoderModel::ALL {
            assert_eq!(model.config_name().parse::<EncoderModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_rejects_unknown_encoder() {
        let err = "not-a-real-encoder".parse::<EncoderModel>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not-a-real-encoder"), "{msg}");
        assert!(msg.contains("'ArcFace'"), "error should list supported names: {msg}");
    }

    #[test]
    fn test_name_matching_is_exact_case() {
        // Configuration names are case-sensitive, mirroring the model zoo.
        assert!("arcface".parse::<EncoderModel>().is_err());
    }

    #[test]
    fn test_every_encoder_has_a_paired_translator() {
        for model in EncoderModel::ALL {
            assert!(model.translator_checkpoint().starts_with("pdt_"));
        }
    }

    #[test]
    fn test_input_geometry_constants() {
        assert_eq!(EncoderModel::ArcFace.input_size(), 112);
        assert_eq!(EncoderModel::Facenet.input_size(), 160);
        assert_eq!(EncoderModel::ArcFace.embedding_dim(), 512);
        assert_eq!(EncoderModel::SFace.embedding_dim(), 128);
    }
}
