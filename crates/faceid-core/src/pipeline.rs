//! The per-frame identification pipeline.
//!
//! Orchestrates detect → align → prepare → encode → translate → match, one
//! face at a time. A failing face is dropped from the result; only
//! configuration-class errors and the enforce-detection signal abort the
//! whole frame.

use std::path::Path;

use image::RgbImage;

use crate::alignment;
use crate::backend::DetectorBackend;
use crate::detector::FaceDetector;
use crate::encoder::{EncoderModel, FaceEncoder};
use crate::error::IdentifyError;
use crate::gallery::{FaceEmbedder, Gallery};
use crate::matcher::{match_probe, DistanceMetric};
use crate::preprocess::{self, Normalization};
use crate::translator::EmbeddingTranslator;
use crate::types::{Detection, Embedding, FaceRegion};

/// Immutable snapshot of the engine's tunables, replaced wholesale on
/// reconfiguration.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierConfig {
    pub detector_backend: DetectorBackend,
    pub encoder_model: EncoderModel,
    pub normalization: Normalization,
    pub grayscale: bool,
    pub align: bool,
    pub enforce_detection: bool,
    /// Extraction confidence threshold, percent scale.
    pub extraction_threshold: f32,
    pub distance_metric: DistanceMetric,
    /// None means "use the metric's canonical default threshold".
    pub identification_threshold: Option<f32>,
    pub sigmoid_steepness: f32,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            detector_backend: DetectorBackend::OpenCv,
            encoder_model: EncoderModel::ArcFace,
            normalization: Normalization::Base,
            grayscale: false,
            align: true,
            enforce_detection: false,
            extraction_threshold: 3.0,
            distance_metric: DistanceMetric::Cosine,
            identification_threshold: None,
            sigmoid_steepness: 10.0,
        }
    }
}

impl IdentifierConfig {
    /// The identification threshold actually applied: the configured value,
    /// or the metric's canonical default when unset.
    pub fn effective_threshold(&self) -> f32 {
        self.identification_threshold
            .unwrap_or_else(|| self.distance_metric.default_threshold())
    }
}

/// Loaded detector + encoder + translator, bound to one configuration.
///
/// All weights are read-only after load; the pipeline mutates nothing but
/// session scratch state during a call.
pub struct IdentificationPipeline {
    detector: FaceDetector,
    encoder: FaceEncoder,
    translator: EmbeddingTranslator,
    config: IdentifierConfig,
}

impl IdentificationPipeline {
    /// Load every network the configuration calls for. Fails fast on a
    /// missing checkpoint so the service never activates half-loaded.
    pub fn load(config: IdentifierConfig, model_dir: &Path) -> Result<Self, IdentifyError> {
        let detector = FaceDetector::load(
            config.detector_backend,
            &model_dir.join(config.detector_backend.checkpoint()),
        )?;
        let encoder = FaceEncoder::load(
            config.encoder_model,
            &model_dir.join(config.encoder_model.checkpoint()),
        )?;
        let translator = EmbeddingTranslator::load(config.encoder_model, model_dir)?;

        Ok(Self {
            detector,
            encoder,
            translator,
            config,
        })
    }

    pub fn config(&self) -> &IdentifierConfig {
        &self.config
    }

    /// Detect faces, applying the extraction threshold and the
    /// enforce-detection policy.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceRegion>, IdentifyError> {
        let regions = self
            .detector
            .detect(frame, self.config.extraction_threshold)?;
        apply_enforcement(regions, self.config.enforce_detection)
    }

    /// Run one face region through align → prepare → encode → translate.
    fn embed_region(
        &mut self,
        frame: &RgbImage,
        region: &FaceRegion,
    ) -> Result<Embedding, IdentifyError> {
        let size = self.config.encoder_model.input_size();
        let crop = match (self.config.align, &region.landmarks) {
            (true, Some(landmarks)) => alignment::align_face(frame, landmarks, size),
            _ => crop_region(frame, region)?,
        };

        let tensor = preprocess::prepare(
            &crop,
            self.config.normalization,
            self.config.encoder_model.mean(),
            self.config.encoder_model.std(),
            size,
            self.config.grayscale,
        )?;
        let raw = self.encoder.encode(&tensor)?;
        self.translator.translate(&raw)
    }

    /// Detect every face in the frame and identify each against the
    /// gallery. Neither `gallery` nor the configuration is mutated.
    pub fn infer(
        &mut self,
        frame: &RgbImage,
        gallery: &Gallery,
    ) -> Result<Vec<Detection>, IdentifyError> {
        let regions = self.detect(frame)?;
        let config = self.config;
        assemble(frame, regions, gallery, &config, |frame, region| {
            self.embed_region(frame, region)
        })
    }
}

impl FaceEmbedder for IdentificationPipeline {
    fn encoder(&self) -> EncoderModel {
        self.config.encoder_model
    }

    fn embed_best_face(&mut self, image: &RgbImage) -> Result<Option<Embedding>, IdentifyError> {
        // Regions come back sorted by descending score; only the best face
        // of a gallery photo is used, never several identities at once.
        let mut regions = self.detector.detect(image, self.config.extraction_threshold)?;
        if regions.is_empty() {
            return Ok(None);
        }
        let best = regions.remove(0);
        self.embed_region(image, &best).map(Some)
    }
}

/// Per-face assembly with failure isolation: embed, match, zip the region
/// back on. A face whose step fails is logged and omitted; frame-aborting
/// errors propagate.
fn assemble<F>(
    frame: &RgbImage,
    regions: Vec<FaceRegion>,
    gallery: &Gallery,
    config: &IdentifierConfig,
    mut embed: F,
) -> Result<Vec<Detection>, IdentifyError>
where
    F: FnMut(&RgbImage, &FaceRegion) -> Result<Embedding, IdentifyError>,
{
    let threshold = config.effective_threshold();
    let mut detections = Vec::with_capacity(regions.len());

    for region in regions {
        let outcome = embed(frame, &region).and_then(|probe| {
            match_probe(
                &probe,
                gallery,
                config.distance_metric,
                threshold,
                config.sigmoid_steepness,
            )
        });
        match outcome {
            Ok((label, confidence)) => detections.push(Detection {
                region,
                label,
                confidence,
            }),
            Err(e) if e.aborts_frame() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, score = region.score, "face dropped from frame");
            }
        }
    }

    Ok(detections)
}

/// Enforce-detection policy: an empty detector result is an error only when
/// the operator asked for one; otherwise it is a valid outcome.
fn apply_enforcement(
    regions: Vec<FaceRegion>,
    enforce: bool,
) -> Result<Vec<FaceRegion>, IdentifyError> {
    if regions.is_empty() && enforce {
        return Err(IdentifyError::NoFaceDetected);
    }
    Ok(regions)
}

/// Plain axis-aligned crop for regions without landmarks (or with alignment
/// disabled), clamped to the frame.
fn crop_region(frame: &RgbImage, region: &FaceRegion) -> Result<RgbImage, IdentifyError> {
    let frame_w = frame.width();
    let frame_h = frame.height();

    let x = (region.x.max(0.0) as u32).min(frame_w.saturating_sub(1));
    let y = (region.y.max(0.0) as u32).min(frame_h.saturating_sub(1));
    let w = (region.width as u32).min(frame_w - x);
    let h = (region.height as u32).min(frame_h - y);

    if w == 0 || h == 0 {
        return Err(IdentifyError::InvalidImage(
            "degenerate face region".to_string(),
        ));
    }

    Ok(image::imageops::crop_imm(frame, x, y, w, h).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use crate::types::UNKNOWN_LABEL;

    fn region(x: f32, y: f32, w: f32, h: f32, score: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: w,
            height: h,
            score,
            landmarks: None,
        }
    }

    fn two_label_gallery() -> Gallery {
        Gallery::new(
            vec![
                GalleryEntry {
                    label: "alice".into(),
                    embeddings: (0..5)
                        .map(|i| Embedding::canonical(vec![1.0, 0.01 * i as f32]))
                        .collect(),
                },
                GalleryEntry {
                    label: "bob".into(),
                    embeddings: (0..5)
                        .map(|i| Embedding::canonical(vec![-1.0, 0.01 * i as f32]))
                        .collect(),
                },
            ],
            EncoderModel::ArcFace,
        )
    }

    #[test]
    fn test_effective_threshold_defaults_per_metric() {
        let mut config = IdentifierConfig::default();
        assert!((config.effective_threshold() - 0.4).abs() < 1e-6);
        config.distance_metric = DistanceMetric::Euclidean;
        assert!((config.effective_threshold() - 1.1).abs() < 1e-6);
        config.identification_threshold = Some(0.77);
        assert!((config.effective_threshold() - 0.77).abs() < 1e-6);
    }

    #[test]
    fn test_assemble_identifies_known_probe() {
        let frame = RgbImage::new(64, 64);
        let gallery = two_label_gallery();
        let config = IdentifierConfig::default();

        // A probe near alice's reference vectors but not identical to any.
        let detections = assemble(
            &frame,
            vec![region(10.0, 10.0, 20.0, 20.0, 90.0)],
            &gallery,
            &config,
            |_, _| Ok(Embedding::canonical(vec![0.98, 0.03])),
        )
        .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "alice");
        assert!(detections[0].confidence > 0.5);
    }

    #[test]
    fn test_assemble_unrelated_probe_is_unknown() {
        let frame = RgbImage::new(64, 64);
        let gallery = two_label_gallery();
        let config = IdentifierConfig::default();

        // Orthogonal to both identities.
        let detections = assemble(
            &frame,
            vec![region(0.0, 0.0, 10.0, 10.0, 80.0)],
            &gallery,
            &config,
            |_, _| Ok(Embedding::canonical(vec![0.0, 1.0])),
        )
        .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_assemble_isolates_per_face_failures() {
        let frame = RgbImage::new(64, 64);
        let gallery = two_label_gallery();
        let config = IdentifierConfig::default();

        let mut calls = 0;
        let detections = assemble(
            &frame,
            vec![
                region(0.0, 0.0, 10.0, 10.0, 90.0),
                region(20.0, 20.0, 10.0, 10.0, 80.0),
            ],
            &gallery,
            &config,
            |_, _| {
                calls += 1;
                if calls == 1 {
                    Err(IdentifyError::InvalidImage("bad crop".into()))
                } else {
                    Ok(Embedding::canonical(vec![1.0, 0.0]))
                }
            },
        )
        .unwrap();

        // First face dropped, second survived.
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "alice");
    }

    #[test]
    fn test_assemble_propagates_frame_aborting_errors() {
        let frame = RgbImage::new(64, 64);
        let gallery = two_label_gallery();
        let config = IdentifierConfig::default();

        let err = assemble(
            &frame,
            vec![region(0.0, 0.0, 10.0, 10.0, 90.0)],
            &gallery,
            &config,
            |_, _| Err(IdentifyError::Configuration("broken".into())),
        )
        .unwrap_err();
        assert!(matches!(err, IdentifyError::Configuration(_)));
    }

    #[test]
    fn test_assemble_empty_gallery_yields_unknown_zero() {
        let frame = RgbImage::new(64, 64);
        let gallery = Gallery::empty(EncoderModel::ArcFace);
        let config = IdentifierConfig::default();

        let detections = assemble(
            &frame,
            vec![region(0.0, 0.0, 10.0, 10.0, 90.0)],
            &gallery,
            &config,
            |_, _| Ok(Embedding::canonical(vec![1.0, 0.0])),
        )
        .unwrap();

        assert_eq!(detections[0].label, UNKNOWN_LABEL);
        assert_eq!(detections[0].confidence, 0.0);
    }

    #[test]
    fn test_enforcement_errors_only_when_asked() {
        let err = apply_enforcement(vec![], true).unwrap_err();
        assert!(matches!(err, IdentifyError::NoFaceDetected));

        let regions = apply_enforcement(vec![], false).unwrap();
        assert!(regions.is_empty());

        let survivors =
            apply_enforcement(vec![region(0.0, 0.0, 5.0, 5.0, 50.0)], true).unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn test_crop_region_clamps_to_frame() {
        let frame = RgbImage::from_pixel(32, 32, image::Rgb([1, 2, 3]));
        let crop = crop_region(&frame, &region(-5.0, 28.0, 100.0, 100.0, 50.0)).unwrap();
        assert_eq!(crop.width(), 32);
        assert_eq!(crop.height(), 4);
    }

    #[test]
    fn test_crop_region_rejects_degenerate() {
        let frame = RgbImage::new(32, 32);
        let err = crop_region(&frame, &region(10.0, 10.0, 0.0, 5.0, 50.0)).unwrap_err();
        assert!(matches!(err, IdentifyError::InvalidImage(_)));
    }
}
