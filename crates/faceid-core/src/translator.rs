//! Cross-model embedding translation into the canonical space.
//!
//! Every distance threshold and the sigmoid calibration are tuned against a
//! single canonical embedding geometry. A frozen translator network per
//! encoder maps that encoder's raw embeddings into the canonical space, so
//! swapping encoders never silently invalidates configured thresholds.

use std::path::Path;

use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;

use crate::encoder::EncoderModel;
use crate::error::IdentifyError;
use crate::providers::preferred_execution_providers;
use crate::types::{Embedding, EmbeddingSpace};

/// Dimensionality of the shared canonical space.
pub const CANONICAL_DIM: usize = 512;

/// Frozen translator for one encoder's embedding space.
#[derive(Debug)]
pub struct EmbeddingTranslator {
    session: Session,
    encoder: EncoderModel,
}

impl EmbeddingTranslator {
    /// Load the translator checkpoint paired with `encoder` from the model
    /// directory.
    ///
    /// A missing checkpoint means this encoder cannot produce calibrated
    /// results in this installation, so configuration fails fast.
    pub fn load(encoder: EncoderModel, model_dir: &Path) -> Result<Self, IdentifyError> {
        let path = model_dir.join(encoder.translator_checkpoint());
        if !path.exists() {
            return Err(IdentifyError::UnsupportedModel(format!(
                "no translator checkpoint for encoder {encoder} (expected {})",
                path.display()
            )));
        }

        let session = Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .with_intra_threads(2)?
            .commit_from_file(&path)?;

        tracing::info!(
            encoder = %encoder,
            path = %path.display(),
            "loaded embedding translator"
        );

        Ok(Self { session, encoder })
    }

    pub fn encoder(&self) -> EncoderModel {
        self.encoder
    }

    /// Map a raw encoder embedding into the canonical space.
    pub fn translate(&mut self, embedding: &Embedding) -> Result<Embedding, IdentifyError> {
        if embedding.space != EmbeddingSpace::Encoder(self.encoder) {
            return Err(IdentifyError::SpaceMismatch {
                expected: EmbeddingSpace::Encoder(self.encoder).to_string(),
                actual: embedding.space.to_string(),
            });
        }

        let dim = embedding.values.len();
        let input = Array2::from_shape_vec((1, dim), embedding.values.clone())
            .map_err(|e| IdentifyError::InferenceFailed(format!("translator input: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, canonical) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            IdentifyError::InferenceFailed(format!("embedding translation: {e}"))
        })?;

        if canonical.len() != CANONICAL_DIM {
            return Err(IdentifyError::InferenceFailed(format!(
                "expected {CANONICAL_DIM}-dim canonical embedding, got {}",
                canonical.len()
            )));
        }

        Ok(Embedding::canonical(canonical.to_vec()))
    }
}
