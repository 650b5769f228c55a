use serde::{Deserialize, Serialize};

use super::face_landmarks::FaceLandmarks;

/// One detected face, serialized as
/// `{"box":[x,y,w,h],"confidence":c,"keypoints":{...}}`.
///
/// The server never interprets these fields; it only encodes them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "box")]
    pub bounding_box: [i32; 4],
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<FaceLandmarks>,
}

impl DetectionRecord {
    /// Builds a record from corner coordinates, clamped to the frame.
    pub fn from_corners(
        corners: [f64; 4],
        confidence: f64,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let [x1, y1, x2, y2] = corners;
        let x1 = x1.clamp(0.0, frame_width as f64);
        let y1 = y1.clamp(0.0, frame_height as f64);
        let x2 = x2.clamp(0.0, frame_width as f64);
        let y2 = y2.clamp(0.0, frame_height as f64);
        let x = x1.round() as i32;
        let y = y1.round() as i32;
        Self {
            bounding_box: [
                x,
                y,
                ((x2 - x1).round() as i32).max(0),
                ((y2 - y1).round() as i32).max(0),
            ],
            confidence: confidence.clamp(0.0, 1.0),
            keypoints: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Option<FaceLandmarks>) -> Self {
        self.keypoints = keypoints;
        self
    }
}
