//! Closed registry of face detector backends.
//!
//! Each variant pairs a pretrained ONNX checkpoint with its own decode
//! strategy in [`crate::detector`]. Backend selection by configured name is
//! a lookup into this registry, validated before any inference runs.

use std::fmt;
use std::str::FromStr;

use crate::error::IdentifyError;

/// A face detection backend. The set is fixed; unknown names are rejected
/// at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    /// YuNet — the detector OpenCV ships as its default DNN face detector.
    OpenCv,
    /// ResNet-10 SSD, single-shot detection matrix output.
    Ssd,
    /// SCRFD, anchor-free multi-stride decoding with landmarks.
    RetinaFace,
    /// YOLOv8-face, row-format output with landmark triplets.
    Yolov8,
    /// BlazeFace short-range, SSD-anchor decoding.
    MediaPipe,
}

impl DetectorBackend {
    pub const ALL: [DetectorBackend; 5] = [
        DetectorBackend::OpenCv,
        DetectorBackend::Ssd,
        DetectorBackend::RetinaFace,
        DetectorBackend::Yolov8,
        DetectorBackend::MediaPipe,
    ];

    /// The name this backend carries in configuration.
    pub fn config_name(&self) -> &'static str {
        match self {
            DetectorBackend::OpenCv => "opencv",
            DetectorBackend::Ssd => "ssd",
            DetectorBackend::RetinaFace => "retinaface",
            DetectorBackend::Yolov8 => "yolov8",
            DetectorBackend::MediaPipe => "mediapipe",
        }
    }

    /// Checkpoint file name under the model directory.
    pub fn checkpoint(&self) -> &'static str {
        match self {
            DetectorBackend::OpenCv => "face_detection_yunet_2023mar.onnx",
            DetectorBackend::Ssd => "res10_300x300_ssd.onnx",
            DetectorBackend::RetinaFace => "scrfd_10g_kps.onnx",
            DetectorBackend::Yolov8 => "yolov8n_face.onnx",
            DetectorBackend::MediaPipe => "blazeface_short_range.onnx",
        }
    }

    /// Square network input resolution.
    pub fn input_size(&self) -> usize {
        match self {
            DetectorBackend::OpenCv => 640,
            DetectorBackend::Ssd => 300,
            DetectorBackend::RetinaFace => 640,
            DetectorBackend::Yolov8 => 640,
            DetectorBackend::MediaPipe => 128,
        }
    }

    fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|b| format!("'{}'", b.config_name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for DetectorBackend {
    type Err = IdentifyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.config_name() == name)
            .ok_or_else(|| {
                IdentifyError::Configuration(format!(
                    "face extractor model must be one of: {}, got '{name}'",
                    Self::supported_names()
                ))
            })
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_config_names() {
        for backend in DetectorBackend::ALL {
            assert_eq!(backend.config_name().parse::<DetectorBackend>().unwrap(), backend);
        }
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = "not-a-real-backend".parse::<DetectorBackend>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not-a-real-backend"), "{msg}");
        assert!(msg.contains("'ssd'"), "error should list supported names: {msg}");
    }

    #[test]
    fn test_rejects_unregistered_original_names() {
        // Names from other stacks without an ONNX artifact here.
        for name in ["dlib", "mtcnn", "fastmtcnn"] {
            assert!(name.parse::<DetectorBackend>().is_err());
        }
    }
}
