//! YOLO face detector using ONNX Runtime via `ort`.
//!
//! Handles letterbox preprocessing, inference, confidence filtering, NMS and
//! keypoint decoding into client-facing [`DetectedFace`] values.

use std::path::Path;

use crate::detection::domain::detected_face::{BoundingBox, DetectedFace, Landmark, LandmarkKind};
use crate::detection::domain::face_detector::{DetectError, FaceDetector};
use crate::shared::frame::Frame;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

const NMS_IOU_THRESH: f64 = 0.45;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to report a landmark.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

/// YOLO-pose face detector backed by an ONNX Runtime session.
pub struct OnnxYoloDetector {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's NCHW input shape, falling
    /// back to 640 when the shape is dynamic.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, DetectError> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    (shape.len() >= 4 && shape[2] > 0).then(|| shape[2] as u32)
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded face model {} (input {input_size}px, confidence {confidence})",
            model_path.display()
        );

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxYoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectError> {
        if frame.channels() != 3 {
            return Err(format!("expected RGB frame, got {} channels", frame.channels()).into());
        }
        if frame.width() == 0 || frame.height() == 0 {
            return Err("frame has no pixels".into());
        }

        let (input_tensor, letterbox) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let mut raw = parse_rows(data, &shape, self.confidence, &letterbox);
        let kept = nms(&mut raw, NMS_IOU_THRESH);

        Ok(kept
            .into_iter()
            .map(|d| d.into_face(frame.width(), frame.height()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Mapping from letterboxed model coordinates back to the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size` NCHW float32.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // 114/255 gray padding, YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    keypoints: Vec<Landmark>,
}

impl RawDetection {
    fn into_face(self, frame_w: u32, frame_h: u32) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox::from_corners(
                self.x1, self.y1, self.x2, self.y2, frame_w, frame_h,
            ),
            score: self.confidence,
            landmarks: self.keypoints,
        }
    }

    fn corners(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Decodes `[1, features, detections]` or `[1, detections, features]` output.
///
/// Row layout: `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
fn parse_rows(
    data: &[f32],
    shape: &[usize],
    min_confidence: f64,
    letterbox: &Letterbox,
) -> Vec<RawDetection> {
    let is_feature_axis = |n: usize| n == 5 || n == 5 + NUM_KEYPOINT_VALUES;
    let transposed = if is_feature_axis(shape[1]) != is_feature_axis(shape[2]) {
        is_feature_axis(shape[1])
    } else {
        shape[1] < shape[2]
    };
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    let at = |det: usize, feat: usize| -> f64 {
        let idx = if transposed {
            feat * num_dets + det
        } else {
            det * num_feats + feat
        };
        data.get(idx).copied().unwrap_or(0.0) as f64
    };

    if num_feats < 5 {
        return Vec::new();
    }

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let conf = at(i, 4);
        if conf < min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        let mut keypoints = Vec::new();
        if num_feats >= 5 + NUM_KEYPOINT_VALUES {
            for (k, kind) in LandmarkKind::ORDER.iter().enumerate() {
                let base = 5 + k * 3;
                if at(i, base + 2) < KEYPOINT_CONF_THRESH {
                    continue;
                }
                let (x, y) = letterbox.unmap(at(i, base), at(i, base + 1));
                keypoints.push(Landmark { kind: *kind, x, y });
            }
        }

        dets.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence: conf,
            keypoints,
        });
    }
    dets
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        let overlaps = keep
            .iter()
            .any(|k| bbox_iou(&k.corners(), &det.corners()) > iou_thresh);
        if !overlaps {
            keep.push(det.clone());
        }
    }
    keep
}

fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0,
        pad_y: 0,
    };

    fn raw(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence,
            keypoints: Vec::new(),
        }
    }

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // 200x100 → 640: scale 3.2, content 640x320, pad_y 160
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_relative_eq!(lb.scale, 3.2, epsilon = 1e-9);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 160);
    }

    #[test]
    fn test_letterbox_pads_with_gray_and_normalizes_content() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);

        let y = lb.pad_y as usize + 1;
        assert_relative_eq!(tensor[[0, 0, y, 1]], 1.0, epsilon = 0.01);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 114.0 / 255.0, epsilon = 0.01);
    }

    #[test]
    fn test_unmap_reverses_letterbox() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 10,
            pad_y: 20,
        };
        let (x, y) = lb.unmap(30.0, 60.0);
        assert_relative_eq!(x, 10.0);
        assert_relative_eq!(y, 20.0);
    }

    #[test]
    fn test_parse_rows_row_major_with_keypoints() {
        // one detection, 20 features: box, conf, 5 keypoints
        let mut row = vec![50.0f32, 50.0, 20.0, 40.0, 0.9];
        for k in 0..5 {
            let conf = if k == 2 { 0.1 } else { 0.9 };
            row.extend_from_slice(&[40.0 + k as f32, 45.0, conf]);
        }
        let dets = parse_rows(&row, &[1, 1, 20], 0.25, &IDENTITY);

        assert_eq!(dets.len(), 1);
        assert_relative_eq!(dets[0].x1, 40.0);
        assert_relative_eq!(dets[0].y1, 30.0);
        assert_relative_eq!(dets[0].x2, 60.0);
        assert_relative_eq!(dets[0].y2, 70.0);
        // nose dropped by keypoint confidence
        let kinds: Vec<_> = dets[0].keypoints.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LandmarkKind::LeftEye,
                LandmarkKind::RightEye,
                LandmarkKind::MouthLeft,
                LandmarkKind::MouthRight,
            ]
        );
    }

    #[test]
    fn test_parse_rows_transposed_and_filtered() {
        // [1, 5 features, 2 detections]; second below threshold
        let data = vec![
            10.0f32, 100.0, // cx
            10.0, 100.0, // cy
            4.0, 4.0, // w
            4.0, 4.0, // h
            0.8, 0.1, // conf
        ];
        let dets = parse_rows(&data, &[1, 5, 2], 0.25, &IDENTITY);

        assert_eq!(dets.len(), 1);
        assert_relative_eq!(dets[0].x1, 8.0);
        assert!(dets[0].keypoints.is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlapping_keeps_highest() {
        let mut dets = vec![
            raw(0.0, 0.0, 100.0, 100.0, 0.5),
            raw(2.0, 2.0, 102.0, 102.0, 0.9),
            raw(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let kept = nms(&mut dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].confidence, 0.9);
        assert_relative_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_nms_empty_input() {
        let mut dets: Vec<RawDetection> = Vec::new();
        assert!(nms(&mut dets, 0.3).is_empty());
    }

    #[test]
    fn test_bbox_iou() {
        assert_eq!(
            bbox_iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]),
            0.0
        );
        let b = [0.0, 0.0, 10.0, 10.0];
        assert_relative_eq!(bbox_iou(&b, &b), 1.0);
    }

    #[test]
    fn test_into_face_clamps_box() {
        let face = raw(-5.0, -5.0, 50.0, 50.0, 0.6).into_face(40, 40);
        assert_relative_eq!(face.bounding_box.x, 0.0);
        assert_relative_eq!(face.bounding_box.width, 40.0);
        assert_relative_eq!(face.score, 0.6);
    }
}
