//! faceid-core — Face detection and identity-matching engine.
//!
//! Runs a detect → align → encode pipeline over ONNX Runtime, maps every
//! encoder's embeddings into one canonical space through a frozen
//! translator network, and matches canonical embeddings against an
//! operator-built gallery with sigmoid-calibrated confidence.

pub mod alignment;
pub mod backend;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod preprocess;
pub mod providers;
pub mod translator;
pub mod types;

pub use backend::DetectorBackend;
pub use config::{ServiceConfig, ValidatedConfig};
pub use encoder::{EncoderModel, FaceEncoder};
pub use error::IdentifyError;
pub use gallery::{build_gallery, FaceEmbedder, Gallery, GalleryEntry};
pub use matcher::{match_probe, sigmoid_confidence, DistanceMetric};
pub use pipeline::{IdentificationPipeline, IdentifierConfig};
pub use preprocess::{decode_image, Normalization};
pub use translator::{EmbeddingTranslator, CANONICAL_DIM};
pub use types::{Detection, Embedding, EmbeddingSpace, FaceRegion, UNKNOWN_LABEL};
