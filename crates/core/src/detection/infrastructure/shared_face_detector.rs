use std::sync::{Arc, Mutex};

use crate::detection::domain::detection_record::DetectionRecord;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::frame::Frame;

/// Cloneable handle to one detector instance shared by every worker.
///
/// The detector is built once at startup; calls are serialized through
/// the mutex.
#[derive(Clone)]
pub struct SharedFaceDetector {
    inner: Arc<Mutex<Box<dyn FaceDetector>>>,
}

impl SharedFaceDetector {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(detector)),
        }
    }
}

impl FaceDetector for SharedFaceDetector {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<DetectionRecord>, Box<dyn std::error::Error>> {
        let mut detector = self
            .inner
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        detector.detect(frame)
    }
}
