//! Pluggable face detectors via ONNX Runtime.
//!
//! One decode strategy per registered backend: SCRFD anchor-free 3-stride
//! decoding, the res10 SSD detection matrix, YuNet's cls/obj/bbox/kps
//! branches, YOLOv8-face row decoding and BlazeFace SSD-anchor decoding.
//! All strategies share letterbox preprocessing and greedy NMS.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::backend::DetectorBackend;
use crate::error::IdentifyError;
use crate::providers::preferred_execution_providers;
use crate::types::FaceRegion;

// --- Named constants ---
const NMS_IOU_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
const BLAZE_NUM_ANCHORS: usize = 896;
const BLAZE_BOX_VALUES: usize = 16;
const SSD_VALUES_PER_ROW: usize = 7;

/// Metadata for mapping coordinates out of the letterboxed input space.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// A decoded candidate in network-input pixel coordinates, pre-NMS.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    /// Raw network score in [0, 1].
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

impl Candidate {
    /// Map back to source-frame pixels, clamp to the frame, and rescale the
    /// score to the percentage range used by the extraction threshold.
    fn into_region(self, letterbox: &Letterbox, frame_w: f32, frame_h: f32) -> FaceRegion {
        let (x1, y1) = letterbox.to_frame(self.x1, self.y1);
        let (x2, y2) = letterbox.to_frame(self.x2, self.y2);
        let x1 = x1.clamp(0.0, frame_w);
        let y1 = y1.clamp(0.0, frame_h);
        let x2 = x2.clamp(0.0, frame_w);
        let y2 = y2.clamp(0.0, frame_h);

        let landmarks = self.landmarks.map(|pts| {
            pts.map(|(lx, ly)| {
                let (fx, fy) = letterbox.to_frame(lx, ly);
                (fx.clamp(0.0, frame_w), fy.clamp(0.0, frame_h))
            })
        });

        FaceRegion {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            score: self.score * 100.0,
            landmarks,
        }
    }
}

/// Face detector bound to one backend's session and decode strategy.
///
/// Weights are loaded once and shared read-only across calls; `detect` is
/// stateless apart from session execution.
pub struct FaceDetector {
    session: Session,
    backend: DetectorBackend,
    input_size: usize,
}

impl FaceDetector {
    /// Load the backend's ONNX checkpoint from the given path.
    pub fn load(backend: DetectorBackend, model_path: &Path) -> Result<Self, IdentifyError> {
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
            backend = %backend,
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face detector"
        );

        Ok(Self {
            session,
            backend,
            input_size: backend.input_size(),
        })
    }

    pub fn backend(&self) -> DetectorBackend {
        self.backend
    }

    /// Detect faces in a frame, discarding regions whose score (percent) is
    /// below `threshold`, sorted by descending score.
    pub fn detect(
        &mut self,
        frame: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<FaceRegion>, IdentifyError> {
        let floor = (threshold / 100.0).clamp(0.0, 1.0);
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let size = self.input_size;
        let candidates = match self.backend {
            DetectorBackend::RetinaFace => {
                let mut all = Vec::new();
                for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
                    let (_, scores) = outputs[pos]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("scrfd scores", stride, e))?;
                    let (_, bboxes) = outputs[pos + 3]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("scrfd bboxes", stride, e))?;
                    let (_, kps) = outputs[pos + 6]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("scrfd kps", stride, e))?;
                    all.extend(decode_scrfd_stride(scores, bboxes, kps, stride, size, floor));
                }
                all
            }
            DetectorBackend::OpenCv => {
                let mut all = Vec::new();
                for &stride in &YUNET_STRIDES {
                    let (_, cls) = outputs[format!("cls_{stride}").as_str()]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("yunet cls", stride, e))?;
                    let (_, obj) = outputs[format!("obj_{stride}").as_str()]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("yunet obj", stride, e))?;
                    let (_, bbox) = outputs[format!("bbox_{stride}").as_str()]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("yunet bbox", stride, e))?;
                    let (_, kps) = outputs[format!("kps_{stride}").as_str()]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| decode_err("yunet kps", stride, e))?;
                    all.extend(decode_yunet_stride(cls, obj, bbox, kps, stride, size, floor));
                }
                all
            }
            DetectorBackend::Ssd => {
                let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                    IdentifyError::InferenceFailed(format!("ssd detection matrix: {e}"))
                })?;
                decode_detection_matrix(data, size, floor)
            }
            DetectorBackend::Yolov8 => {
                let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                    IdentifyError::InferenceFailed(format!("yolo output: {e}"))
                })?;
                let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
                if dims.len() != 3 {
                    return Err(IdentifyError::InferenceFailed(format!(
                        "unexpected yolo output shape: {dims:?}"
                    )));
                }
                // [1, features, detections] exports are transposed.
                let transposed = dims[1] < dims[2];
                let (num_dets, num_feats) = if transposed {
                    (dims[2], dims[1])
                } else {
                    (dims[1], dims[2])
                };
                decode_yolo_rows(data, num_dets, num_feats, transposed, floor)
            }
            DetectorBackend::MediaPipe => {
                let (_, first) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                    IdentifyError::InferenceFailed(format!("blazeface output: {e}"))
                })?;
                let (_, second) = outputs[1].try_extract_tensor::<f32>().map_err(|e| {
                    IdentifyError::InferenceFailed(format!("blazeface output: {e}"))
                })?;
                // Assign boxes/scores by element count: 896×16 vs 896×1.
                let (boxes, scores) = if first.len() >= second.len() {
                    (first, second)
                } else {
                    (second, first)
                };
                decode_blazeface(scores, boxes, size, floor)
            }
        };

        let kept = nms(candidates, NMS_IOU_THRESHOLD);

        let mut regions: Vec<FaceRegion> = kept
            .into_iter()
            .map(|c| c.into_region(&letterbox, frame.width() as f32, frame.height() as f32))
            .collect();
        regions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(regions)
    }

    /// Letterbox-resize the frame and fill the network input tensor with the
    /// backend's channel order and value range.
    fn preprocess(&self, frame: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.input_size;
        let (rgb, letterbox) = letterbox_resize(frame, size, self.pad_color());

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let base = (y * size + x) * 3;
                let r = rgb[base] as f32;
                let g = rgb[base + 1] as f32;
                let b = rgb[base + 2] as f32;
                let channels = match self.backend {
                    // YuNet consumes raw-range BGR (OpenCV blob convention).
                    DetectorBackend::OpenCv => [b, g, r],
                    // res10 SSD: BGR with per-channel mean subtraction.
                    DetectorBackend::Ssd => [b - 104.0, g - 177.0, r - 123.0],
                    DetectorBackend::RetinaFace => [
                        (r - 127.5) / 128.0,
                        (g - 127.5) / 128.0,
                        (b - 127.5) / 128.0,
                    ],
                    DetectorBackend::Yolov8 => [r / 255.0, g / 255.0, b / 255.0],
                    DetectorBackend::MediaPipe => {
                        [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0]
                    }
                };
                for (c, value) in channels.into_iter().enumerate() {
                    tensor[[0, c, y, x]] = value;
                }
            }
        }

        (tensor, letterbox)
    }

    /// Pad color chosen so padding lands on the backend's neutral value.
    fn pad_color(&self) -> [u8; 3] {
        match self.backend {
            DetectorBackend::OpenCv => [0, 0, 0],
            // RGB that zeroes out after the BGR mean subtraction.
            DetectorBackend::Ssd => [123, 177, 104],
            DetectorBackend::RetinaFace => [128, 128, 128],
            DetectorBackend::Yolov8 => [114, 114, 114],
            DetectorBackend::MediaPipe => [128, 128, 128],
        }
    }
}

fn decode_err(what: &str, stride: usize, e: ort::Error) -> IdentifyError {
    IdentifyError::InferenceFailed(format!("{what} stride {stride}: {e}"))
}

/// Bilinear letterbox resize of an RGB frame into a square buffer.
///
/// Returns the interleaved RGB buffer plus the scale/padding needed to map
/// coordinates back to the source frame.
fn letterbox_resize(frame: &RgbImage, target: usize, pad: [u8; 3]) -> (Vec<u8>, Letterbox) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;

    let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, target);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, target);
    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut out = Vec::with_capacity(target * target * 3);
    for _ in 0..target * target {
        out.extend_from_slice(&pad);
    }

    let src = frame.as_raw();
    let inv_scale = 1.0 / scale;
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let dst = ((y + pad_y) * target + (x + pad_x)) * 3;
            for c in 0..3 {
                let tl = src[(y0 * width + x0) * 3 + c] as f32;
                let tr = src[(y0 * width + x1) * 3 + c] as f32;
                let bl = src[(y1 * width + x0) * 3 + c] as f32;
                let br = src[(y1 * width + x1) * 3 + c] as f32;
                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;
                out[dst + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (out, letterbox)
}

/// Decode one SCRFD stride level: anchor-free offsets, 2 anchors per cell.
fn decode_scrfd_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    floor: f32,
) -> Vec<Candidate> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut candidates = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score < floor {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut pts = [(0.0f32, 0.0f32); 5];
            for (i, pt) in pts.iter_mut().enumerate() {
                *pt = (
                    anchor_cx + kps[kps_off + i * 2] * stride as f32,
                    anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32,
                );
            }
            Some(pts)
        } else {
            None
        };

        candidates.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks,
        });
    }

    candidates
}

/// Decode one YuNet stride level.
///
/// Scores arrive sigmoid-activated; the decoded score is cls × objectness.
/// Box and keypoint offsets are expressed in stride units around the anchor
/// center at `(col + 0.5, row + 0.5) × stride`.
fn decode_yunet_stride(
    cls: &[f32],
    obj: &[f32],
    bbox: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    floor: f32,
) -> Vec<Candidate> {
    let grid = input_size / stride;
    let num_anchors = (grid * grid).min(cls.len());
    let stride_f = stride as f32;

    let mut candidates = Vec::new();
    for i in 0..num_anchors {
        let score = cls[i] * obj.get(i).copied().unwrap_or(0.0);
        if score < floor {
            continue;
        }
        if (i + 1) * 4 > bbox.len() || (i + 1) * 10 > kps.len() {
            continue;
        }

        let anchor_cx = ((i % grid) as f32 + 0.5) * stride_f;
        let anchor_cy = ((i / grid) as f32 + 0.5) * stride_f;

        let cx = anchor_cx + bbox[i * 4] * stride_f;
        let cy = anchor_cy + bbox[i * 4 + 1] * stride_f;
        let w = bbox[i * 4 + 2] * stride_f;
        let h = bbox[i * 4 + 3] * stride_f;

        let mut pts = [(0.0f32, 0.0f32); 5];
        for (k, pt) in pts.iter_mut().enumerate() {
            *pt = (
                anchor_cx + kps[i * 10 + k * 2] * stride_f,
                anchor_cy + kps[i * 10 + k * 2 + 1] * stride_f,
            );
        }

        candidates.push(Candidate {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score,
            landmarks: Some(pts),
        });
    }

    candidates
}

/// Decode the single-shot detection matrix `[1, 1, N, 7]`:
/// rows of `[image_id, class_id, score, x1, y1, x2, y2]` with coordinates
/// normalized to the network input square. No landmarks.
fn decode_detection_matrix(data: &[f32], input_size: usize, floor: f32) -> Vec<Candidate> {
    let size = input_size as f32;

    data.chunks_exact(SSD_VALUES_PER_ROW)
        .filter_map(|row| {
            let score = row[2];
            if score < floor || !(0.0..=1.0).contains(&score) {
                return None;
            }
            Some(Candidate {
                x1: row[3] * size,
                y1: row[4] * size,
                x2: row[5] * size,
                y2: row[6] * size,
                score,
                landmarks: None,
            })
        })
        .collect()
}

/// Decode YOLOv8-face rows `[cx, cy, w, h, score, 5 × (kx, ky, kconf)]`.
///
/// Transposed exports store the tensor as `[features, detections]`; the
/// caller tells us which layout the model produced.
fn decode_yolo_rows(
    data: &[f32],
    num_dets: usize,
    num_feats: usize,
    transposed: bool,
    floor: f32,
) -> Vec<Candidate> {
    let at = |det: usize, feat: usize| -> f32 {
        if transposed {
            data[feat * num_dets + det]
        } else {
            data[det * num_feats + feat]
        }
    };

    let mut candidates = Vec::new();
    for i in 0..num_dets {
        if num_feats < 5 {
            break;
        }
        let score = at(i, 4);
        if score < floor {
            continue;
        }

        let cx = at(i, 0);
        let cy = at(i, 1);
        let w = at(i, 2);
        let h = at(i, 3);

        let landmarks = if num_feats >= 5 + 15 {
            let mut pts = [(0.0f32, 0.0f32); 5];
            for (k, pt) in pts.iter_mut().enumerate() {
                *pt = (at(i, 5 + k * 3), at(i, 5 + k * 3 + 1));
            }
            Some(pts)
        } else {
            None
        };

        candidates.push(Candidate {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score,
            landmarks,
        });
    }

    candidates
}

/// Anchor centers for BlazeFace short-range: 16×16 grid with 2 anchors per
/// cell followed by an 8×8 grid with 6, all in normalized coordinates.
fn blaze_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(BLAZE_NUM_ANCHORS);
    for y in 0..16 {
        for x in 0..16 {
            for _ in 0..2 {
                anchors.push(((x as f32 + 0.5) / 16.0, (y as f32 + 0.5) / 16.0));
            }
        }
    }
    for y in 0..8 {
        for x in 0..8 {
            for _ in 0..6 {
                anchors.push(((x as f32 + 0.5) / 8.0, (y as f32 + 0.5) / 8.0));
            }
        }
    }
    anchors
}

/// Decode BlazeFace raw outputs: per-anchor logit scores and 16-value box
/// regressors (box + 6 keypoints) offset from the anchor center.
///
/// BlazeFace's keypoint set (eyes, nose, mouth center, ears) does not line
/// up with the five-point alignment template, so no landmarks are emitted.
fn decode_blazeface(scores: &[f32], boxes: &[f32], input_size: usize, floor: f32) -> Vec<Candidate> {
    let size = input_size as f32;
    let anchors = blaze_anchors();
    let count = anchors
        .len()
        .min(scores.len())
        .min(boxes.len() / BLAZE_BOX_VALUES);

    let mut candidates = Vec::new();
    for (i, &(ax, ay)) in anchors.iter().take(count).enumerate() {
        let score = 1.0 / (1.0 + (-scores[i]).exp());
        if score < floor {
            continue;
        }

        let off = i * BLAZE_BOX_VALUES;
        let cx = ax + boxes[off] / size;
        let cy = ay + boxes[off + 1] / size;
        let w = boxes[off + 2] / size;
        let h = boxes[off + 3] / size;

        candidates.push(Candidate {
            x1: (cx - w / 2.0) * size,
            y1: (cy - h / 2.0) * size,
            x2: (cx + w / 2.0) * size,
            y2: (cy + h / 2.0) * size,
            score,
            landmarks: None,
        });
    }

    candidates
}

/// Greedy NMS: keep the highest-scoring candidate, suppress overlaps.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(20.0, 20.0, 30.0, 30.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(5.0, 0.0, 15.0, 10.0, 1.0);
        // Overlap 5×10 = 50, union 100 + 100 - 50 = 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                candidate(0.0, 0.0, 100.0, 100.0, 0.9),
                candidate(5.0, 5.0, 105.0, 105.0, 0.8),
                candidate(200.0, 200.0, 250.0, 250.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_coordinates_round_trip() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([50, 60, 70]));
        let (_, letterbox) = letterbox_resize(&frame, 640, [0, 0, 0]);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;
        let (rx, ry) = letterbox.to_frame(boxed_x, boxed_y);

        assert!((rx - orig_x).abs() < 0.1, "x: {rx} vs {orig_x}");
        assert!((ry - orig_y).abs() < 0.1, "y: {ry} vs {orig_y}");
    }

    #[test]
    fn test_letterbox_pads_wide_frame_vertically() {
        let frame = RgbImage::from_pixel(100, 50, image::Rgb([255, 255, 255]));
        let (buf, letterbox) = letterbox_resize(&frame, 640, [7, 8, 9]);

        assert_eq!(letterbox.pad_x, 0.0);
        assert!(letterbox.pad_y > 0.0);
        // Top-left corner is padding.
        assert_eq!(&buf[0..3], &[7, 8, 9]);
        // A pixel inside the image region kept its value.
        let inside = ((letterbox.pad_y as usize + 1) * 640 + 1) * 3;
        assert_eq!(&buf[inside..inside + 3], &[255, 255, 255]);
    }

    #[test]
    fn test_letterbox_uniform_stays_uniform() {
        let frame = RgbImage::from_pixel(100, 100, image::Rgb([128, 128, 128]));
        let (buf, _) = letterbox_resize(&frame, 200, [128, 128, 128]);
        assert!(buf.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_decode_detection_matrix_filters_and_scales() {
        // Two rows: one confident face, one below floor.
        let data = [
            0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.4, //
            0.0, 1.0, 0.01, 0.5, 0.5, 0.6, 0.6,
        ];
        let dets = decode_detection_matrix(&data, 300, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x1 - 30.0).abs() < 1e-4);
        assert!((d.y1 - 60.0).abs() < 1e-4);
        assert!((d.x2 - 90.0).abs() < 1e-4);
        assert!((d.y2 - 120.0).abs() < 1e-4);
        assert!((d.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_detection_matrix_rejects_garbage_scores() {
        // Padding rows in the matrix often carry junk; scores outside [0,1]
        // must never surface as detections.
        let data = [0.0, 1.0, 7.5, 0.1, 0.1, 0.2, 0.2];
        assert!(decode_detection_matrix(&data, 300, 0.1).is_empty());
    }

    #[test]
    fn test_decode_scrfd_stride_single_anchor() {
        // Grid 80×80 at stride 8 for 640 input, 2 anchors per cell.
        let num = 80 * 80 * 2;
        let mut scores = vec![0.0f32; num];
        let mut bboxes = vec![0.0f32; num * 4];
        let kps = vec![0.0f32; num * 10];

        // Anchor index 2 → cell 1 → center (8, 0); offsets of one stride on
        // each side make a 16×16 box.
        scores[2] = 0.8;
        bboxes[8] = 1.0;
        bboxes[9] = 1.0;
        bboxes[10] = 1.0;
        bboxes[11] = 1.0;

        let dets = decode_scrfd_stride(&scores, &bboxes, &kps, 8, 640, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x1 - 0.0).abs() < 1e-4);
        assert!((d.x2 - 16.0).abs() < 1e-4);
        assert!((d.y1 + 8.0).abs() < 1e-4);
        assert!((d.y2 - 8.0).abs() < 1e-4);
        assert!(d.landmarks.is_some());
    }

    #[test]
    fn test_decode_yunet_score_is_cls_times_obj() {
        let grid = 80usize; // stride 8 at 640
        let n = grid * grid;
        let mut cls = vec![0.0f32; n];
        let mut obj = vec![0.0f32; n];
        let bbox = vec![0.0f32; n * 4];
        let kps = vec![0.0f32; n * 10];

        cls[0] = 0.9;
        obj[0] = 0.5; // 0.45 combined — below a 0.5 floor
        let dets = decode_yunet_stride(&cls, &obj, &bbox, &kps, 8, 640, 0.5);
        assert!(dets.is_empty());

        obj[0] = 0.8; // 0.72 combined
        let dets = decode_yunet_stride(&cls, &obj, &bbox, &kps, 8, 640, 0.5);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.72).abs() < 1e-5);
        // Zero offsets put the box center on the anchor center (4, 4).
        assert!(dets[0].landmarks.is_some());
    }

    #[test]
    fn test_decode_yolo_rows_both_layouts() {
        // One detection, 20 features: box, score, 5 keypoint triplets.
        let row: Vec<f32> = vec![
            100.0, 100.0, 40.0, 40.0, 0.9, // box + score
            90.0, 90.0, 1.0, 110.0, 90.0, 1.0, 100.0, 100.0, 1.0, //
            92.0, 110.0, 1.0, 108.0, 110.0, 1.0,
        ];

        let plain = decode_yolo_rows(&row, 1, 20, false, 0.5);
        assert_eq!(plain.len(), 1);
        assert!((plain[0].x1 - 80.0).abs() < 1e-4);
        assert!((plain[0].y2 - 120.0).abs() < 1e-4);
        assert_eq!(plain[0].landmarks.unwrap()[0], (90.0, 90.0));

        // Transposed layout stores the same values feature-major; with a
        // single detection the buffer is identical.
        let transposed = decode_yolo_rows(&row, 1, 20, true, 0.5);
        assert_eq!(transposed.len(), 1);
        assert!((transposed[0].x1 - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_yolo_rows_filters_low_score() {
        let row: Vec<f32> = vec![100.0, 100.0, 40.0, 40.0, 0.1];
        assert!(decode_yolo_rows(&row, 1, 5, false, 0.5).is_empty());
    }

    #[test]
    fn test_blaze_anchor_count() {
        assert_eq!(blaze_anchors().len(), BLAZE_NUM_ANCHORS);
    }

    #[test]
    fn test_decode_blazeface_sigmoid_and_offsets() {
        let mut scores = vec![-20.0f32; BLAZE_NUM_ANCHORS];
        let boxes = vec![0.0f32; BLAZE_NUM_ANCHORS * BLAZE_BOX_VALUES];

        // Large positive logit → score ~1.0 at the first anchor (center
        // (0.5/16, 0.5/16) normalized).
        scores[0] = 20.0;
        let dets = decode_blazeface(&scores, &boxes, 128, 0.5);
        assert_eq!(dets.len(), 1);
        assert!(dets[0].score > 0.99);
        // Zero-size box centered on the anchor.
        let cx = (0.5 / 16.0) * 128.0;
        assert!((dets[0].x1 - cx).abs() < 1e-4);
        assert!((dets[0].x2 - cx).abs() < 1e-4);
    }

    #[test]
    fn test_candidate_into_region_clamps_and_scales() {
        let letterbox = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let region = candidate(-10.0, 0.0, 1000.0, 100.0, 0.75)
            .into_region(&letterbox, 320.0, 240.0);
        assert_eq!(region.x, 0.0);
        assert!((region.width - 320.0).abs() < 1e-4);
        assert!((region.score - 75.0).abs() < 1e-4);
    }
}
