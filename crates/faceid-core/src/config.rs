//! Service configuration schema.
//!
//! A typed serde schema with explicit per-field defaults, validated once by
//! [`ServiceConfig::validate`] before the service activates — never
//! re-interpreted per access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::DetectorBackend;
use crate::encoder::EncoderModel;
use crate::error::IdentifyError;
use crate::matcher::DistanceMetric;
use crate::pipeline::IdentifierConfig;
use crate::preprocess::Normalization;

/// Raw configuration as supplied by the host, JSON-shaped.
///
/// String-valued enum fields stay strings here; `validate` turns them into
/// registry variants or fails with a descriptive error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub camera_name: String,

    /// Detector backend checked at validation time.
    #[serde(default = "default_face_extractor_model")]
    pub face_extractor_model: String,

    /// Detector backend used at runtime.
    #[serde(default = "default_extractor_model")]
    pub extractor_model: String,

    #[serde(default = "default_face_embedding_model")]
    pub face_embedding_model: String,

    /// Percent scale; regions scoring below this never enter the pipeline.
    #[serde(default = "default_extraction_threshold")]
    pub extractor_confidence_threshold: f32,

    #[serde(default)]
    pub grayscale: bool,

    #[serde(default)]
    pub enforce_detection: bool,

    #[serde(default = "default_true")]
    pub align: bool,

    #[serde(default = "default_normalization")]
    pub normalization: String,

    /// Root for relative gallery directories.
    #[serde(default)]
    pub dataset_path: String,

    #[serde(default)]
    pub label_and_directories: BTreeMap<String, PathBuf>,

    #[serde(default = "default_distance_metric")]
    pub distance_metric: String,

    /// None means "use the metric's canonical default threshold".
    #[serde(default)]
    pub identification_threshold: Option<f32>,

    #[serde(default = "default_sigmoid_steepness")]
    pub sigmoid_steepness: f32,

    /// Directory holding detector/encoder/translator checkpoints.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
}

fn default_face_extractor_model() -> String {
    "ssd".to_string()
}

fn default_extractor_model() -> String {
    "opencv".to_string()
}

fn default_face_embedding_model() -> String {
    "ArcFace".to_string()
}

fn default_extraction_threshold() -> f32 {
    3.0
}

fn default_true() -> bool {
    true
}

fn default_normalization() -> String {
    "base".to_string()
}

fn default_distance_metric() -> String {
    "cosine".to_string()
}

fn default_sigmoid_steepness() -> f32 {
    10.0
}

/// Checkpoint directory: `FACEID_MODEL_DIR`, else `$XDG_DATA_HOME/faceid/models`.
fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEID_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid/models")
}

/// Configuration after validation: every enum resolved, every path
/// absolute, ready to build an engine from.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub camera_name: String,
    pub identifier: IdentifierConfig,
    pub labels: BTreeMap<String, PathBuf>,
    pub model_dir: PathBuf,
}

impl ServiceConfig {
    /// Parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, IdentifyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, IdentifyError> {
        serde_json::from_str(raw)
            .map_err(|e| IdentifyError::Configuration(format!("malformed configuration: {e}")))
    }

    /// Validate every field and resolve enums, before any model loads or
    /// inference runs.
    pub fn validate(&self) -> Result<ValidatedConfig, IdentifyError> {
        if self.camera_name.is_empty() {
            return Err(IdentifyError::Configuration(
                "a camera name is required for the face identification service".to_string(),
            ));
        }

        // Both backend fields must name registered backends; the runtime
        // one is what the pipeline loads.
        let _checked: DetectorBackend = self.face_extractor_model.parse()?;
        let detector_backend: DetectorBackend = self.extractor_model.parse()?;
        let encoder_model: EncoderModel = self.face_embedding_model.parse()?;
        let normalization: Normalization = self.normalization.parse()?;
        let distance_metric: DistanceMetric = self.distance_metric.parse()?;

        if self.sigmoid_steepness <= 0.0 {
            return Err(IdentifyError::Configuration(format!(
                "sigmoid_steepness must be positive, got {}",
                self.sigmoid_steepness
            )));
        }
        if let Some(threshold) = self.identification_threshold {
            if threshold < 0.0 {
                return Err(IdentifyError::Configuration(format!(
                    "identification_threshold must be non-negative, got {threshold}"
                )));
            }
        }

        let dataset_root = PathBuf::from(&self.dataset_path);
        let labels = self
            .label_and_directories
            .iter()
            .map(|(label, dir)| {
                let resolved = if dir.is_relative() && !self.dataset_path.is_empty() {
                    dataset_root.join(dir)
                } else {
                    dir.clone()
                };
                (label.clone(), resolved)
            })
            .collect();

        Ok(ValidatedConfig {
            camera_name: self.camera_name.clone(),
            identifier: IdentifierConfig {
                detector_backend,
                encoder_model,
                normalization,
                grayscale: self.grayscale,
                align: self.align,
                enforce_detection: self.enforce_detection,
                extraction_threshold: self.extractor_confidence_threshold,
                distance_metric,
                identification_threshold: self.identification_threshold,
                sigmoid_steepness: self.sigmoid_steepness,
            },
            labels,
            model_dir: self.model_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(r#"{{"camera_name": "cam0"{extra}}}"#)
    }

    #[test]
    fn test_defaults_match_the_documented_surface() {
        let config = ServiceConfig::from_json(&minimal("")).unwrap();
        assert_eq!(config.face_extractor_model, "ssd");
        assert_eq!(config.extractor_model, "opencv");
        assert_eq!(config.face_embedding_model, "ArcFace");
        assert_eq!(config.extractor_confidence_threshold, 3.0);
        assert!(!config.grayscale);
        assert!(!config.enforce_detection);
        assert!(config.align);
        assert_eq!(config.normalization, "base");
        assert_eq!(config.distance_metric, "cosine");
        assert_eq!(config.identification_threshold, None);
        assert_eq!(config.sigmoid_steepness, 10.0);

        let validated = config.validate().unwrap();
        assert_eq!(validated.identifier.detector_backend, DetectorBackend::OpenCv);
        assert_eq!(validated.identifier.encoder_model, EncoderModel::ArcFace);
    }

    #[test]
    fn test_missing_camera_name_is_rejected() {
        let config = ServiceConfig::from_json("{}").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("camera name"), "{err}");
    }

    #[test]
    fn test_unknown_extractor_is_rejected_before_any_inference() {
        let config = ServiceConfig::from_json(&minimal(
            r#", "face_extractor_model": "not-a-real-backend""#,
        ))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, IdentifyError::Configuration(_)));
        assert!(err.to_string().contains("not-a-real-backend"), "{err}");
    }

    #[test]
    fn test_unknown_encoder_is_rejected() {
        let config = ServiceConfig::from_json(&minimal(
            r#", "face_embedding_model": "not-a-real-encoder""#,
        ))
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_extractor_is_validated_too() {
        let config =
            ServiceConfig::from_json(&minimal(r#", "extractor_model": "dlib""#)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(ServiceConfig::from_json(&minimal(r#", "tpyo": 1"#)).is_err());
    }

    #[test]
    fn test_negative_steepness_rejected() {
        let config =
            ServiceConfig::from_json(&minimal(r#", "sigmoid_steepness": -2"#)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_threshold_survives_validation() {
        let config = ServiceConfig::from_json(&minimal(
            r#", "identification_threshold": 0.25, "distance_metric": "euclidean_l2""#,
        ))
        .unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(validated.identifier.identification_threshold, Some(0.25));
        assert!((validated.identifier.effective_threshold() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_relative_label_dirs_resolve_against_dataset_path() {
        let config = ServiceConfig::from_json(&minimal(
            r#", "dataset_path": "/data/faces",
                "label_and_directories": {"alice": "alice_photos", "bob": "/abs/bob"}"#,
        ))
        .unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(
            validated.labels["alice"],
            PathBuf::from("/data/faces/alice_photos")
        );
        assert_eq!(validated.labels["bob"], PathBuf::from("/abs/bob"));
    }
}
