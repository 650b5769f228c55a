use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::detection::domain::face_detector::FaceDetector;

use super::cached_face_detector::CachedFaceDetector;
use super::onnx_blazeface_detector::{self, OnnxBlazefaceDetector};
use super::onnx_yolo_detector::{self, OnnxYoloDetector};
use super::shared_face_detector::SharedFaceDetector;

/// Which detection model backs the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectorKind {
    /// YOLO face-pose: boxes plus five landmarks.
    #[default]
    Yolo,
    /// BlazeFace short-range: boxes only.
    Blazeface,
}

impl DetectorKind {
    /// Threshold used when none is configured.
    pub fn default_confidence(self) -> f64 {
        match self {
            DetectorKind::Yolo => onnx_yolo_detector::DEFAULT_CONFIDENCE,
            DetectorKind::Blazeface => onnx_blazeface_detector::DEFAULT_CONFIDENCE,
        }
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yolo" => Ok(DetectorKind::Yolo),
            "blazeface" => Ok(DetectorKind::Blazeface),
            other => Err(format!(
                "unknown detector '{other}', expected 'yolo' or 'blazeface'"
            )),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Yolo => write!(f, "yolo"),
            DetectorKind::Blazeface => write!(f, "blazeface"),
        }
    }
}

/// Loads the ONNX model for `kind` and wraps it for sharing.
pub fn create_detector(
    kind: DetectorKind,
    model_path: &Path,
    confidence: f64,
    cache_capacity: usize,
) -> Result<SharedFaceDetector, Box<dyn std::error::Error>> {
    log::info!(
        "Loading {kind} detector from {} (confidence {confidence})",
        model_path.display()
    );
    let base: Box<dyn FaceDetector> = match kind {
        DetectorKind::Yolo => Box::new(OnnxYoloDetector::new(model_path, confidence)?),
        DetectorKind::Blazeface => Box::new(OnnxBlazefaceDetector::new(model_path, confidence)?),
    };
    wrap_detector(base, cache_capacity)
}

/// Adds the result cache when `cache_capacity > 0`, then the shared handle.
pub fn wrap_detector(
    base: Box<dyn FaceDetector>,
    cache_capacity: usize,
) -> Result<SharedFaceDetector, Box<dyn std::error::Error>> {
    let detector: Box<dyn FaceDetector> = if cache_capacity > 0 {
        log::info!("Detection cache enabled ({cache_capacity} entries)");
        Box::new(CachedFaceDetector::new(base, cache_capacity)?)
    } else {
        base
    };
    Ok(SharedFaceDetector::new(detector))
}
