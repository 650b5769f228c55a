/// YOLO face-pose detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, output decoding and NMS.
/// Each detection carries five landmarks gated by keypoint confidence.
use std::path::Path;

use crate::detection::domain::detection_record::DetectionRecord;
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::frame::Frame;

use super::execution_provider::build_session;
use super::math::nms;

/// Fallback YOLO model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Number of keypoints per detection (5 landmarks × 3 values each: x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to treat a landmark as visible.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

/// YOLO face detector backed by an ONNX Runtime session.
pub struct OnnxYoloDetector {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    // [N, C, H, W]: H and W are equal for square input
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxYoloDetector {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<DetectionRecord>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let (input_tensor, geometry) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let raw = decode_output(data, &shape, self.confidence, &geometry)?;
        Ok(to_records(raw, frame.width(), frame.height()))
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// How the source frame was placed inside the square model input.
#[derive(Clone, Copy, Debug)]
struct LetterboxGeometry {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

/// Letterbox-resize a frame to `target_size` × `target_size` NCHW float32.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, LetterboxGeometry) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention
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
        LetterboxGeometry {
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
    corners: [f64; 4],
    confidence: f64,
    keypoints: Option<[(f64, f64); 5]>,
}

/// Decode the raw output tensor into frame-space detections.
///
/// YOLO emits either `[1, features, detections]` (transposed) or
/// `[1, detections, features]`; both are handled. Each feature row is
/// `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
fn decode_output(
    data: &[f32],
    shape: &[usize],
    confidence: f64,
    lb: &LetterboxGeometry,
) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if data.len() < num_dets * num_feats {
        return Err("YOLO output shorter than its shape".into());
    }

    let pad_x = lb.pad_x as f64;
    let pad_y = lb.pad_y as f64;
    let unletterbox = |x: f64, y: f64| ((x - pad_x) / lb.scale, (y - pad_y) / lb.scale);

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let feat = |f: usize| -> f64 {
            if transposed {
                data[f * num_dets + i] as f64
            } else {
                data[i * num_feats + f] as f64
            }
        };

        if num_feats < 5 {
            continue;
        }
        let conf = feat(4);
        if conf < confidence {
            continue;
        }

        let (cx, cy, w, h) = (feat(0), feat(1), feat(2), feat(3));
        let (x1, y1) = unletterbox(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = unletterbox(cx + w / 2.0, cy + h / 2.0);

        let keypoints = (num_feats >= 5 + NUM_KEYPOINT_VALUES).then(|| {
            let mut pts = [(0.0f64, 0.0f64); 5];
            for (k, pt) in pts.iter_mut().enumerate() {
                if feat(5 + k * 3 + 2) >= KEYPOINT_CONF_THRESH {
                    *pt = unletterbox(feat(5 + k * 3), feat(5 + k * 3 + 1));
                }
                // else: stays (0.0, 0.0), which FaceLandmarks treats as invisible
            }
            pts
        });

        dets.push(RawDetection {
            corners: [x1, y1, x2, y2],
            confidence: conf,
            keypoints,
        });
    }
    Ok(dets)
}

fn to_records(dets: Vec<RawDetection>, frame_w: u32, frame_h: u32) -> Vec<DetectionRecord> {
    let boxes: Vec<[f64; 4]> = dets.iter().map(|d| d.corners).collect();
    let scores: Vec<f64> = dets.iter().map(|d| d.confidence).collect();

    nms(&boxes, &scores, NMS_IOU_THRESH)
        .into_iter()
        .map(|i| {
            let d = &dets[i];
            DetectionRecord::from_corners(d.corners, d.confidence, frame_w, frame_h)
                .with_keypoints(d.keypoints.as_ref().and_then(FaceLandmarks::from_points))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
