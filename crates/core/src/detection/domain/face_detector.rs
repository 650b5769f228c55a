use crate::detection::domain::detection_record::DetectionRecord;
use crate::shared::frame::Frame;

/// Domain interface for face detection.
///
/// Implementations may hold mutable inference state (an ONNX session,
/// a result cache), hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame)
        -> Result<Vec<DetectionRecord>, Box<dyn std::error::Error>>;
}
