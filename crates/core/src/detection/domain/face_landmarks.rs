//! Five-point face landmarks as they appear on the wire.
//!
//! Detectors produce points in the order
//! `[left_eye, right_eye, nose, mouth_left, mouth_right]`; a point with
//! `x <= 0` is invisible and omitted from the serialized form.

use serde::{Deserialize, Serialize};

const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;
const MOUTH_LEFT: usize = 3;
const MOUTH_RIGHT: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_eye: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_eye: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nose: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_left: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_right: Option<[i32; 2]>,
}

impl FaceLandmarks {
    /// Builds landmarks from raw detector points, or `None` when no point
    /// is visible.
    pub fn from_points(points: &[(f64, f64); 5]) -> Option<Self> {
        let visible = |i: usize| {
            let (x, y) = points[i];
            (x > 0.0).then(|| [x.round() as i32, y.round() as i32])
        };
        let landmarks = Self {
            left_eye: visible(LEFT_EYE),
            right_eye: visible(RIGHT_EYE),
            nose: visible(NOSE),
            mouth_left: visible(MOUTH_LEFT),
            mouth_right: visible(MOUTH_RIGHT),
        };
        landmarks.has_visible().then_some(landmarks)
    }

    pub fn has_visible(&self) -> bool {
        self.visible_count() > 0
    }

    pub fn visible_count(&self) -> usize {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.mouth_left,
            self.mouth_right,
        ]
        .iter()
        .filter(|p| p.is_some())
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontal_points() -> [(f64, f64); 5] {
        [
            (440.0, 350.0), // left_eye
            (560.0, 350.0), // right_eye
            (500.0, 420.0), // nose
            (460.0, 470.0), // mouth_left
            (540.0, 470.0), // mouth_right
        ]
    }

    #[test]
    fn test_from_points_all_visible() {
        let lm = FaceLandmarks::from_points(&frontal_points()).unwrap();
        assert_eq!(lm.visible_count(), 5);
        assert_eq!(lm.left_eye, Some([440, 350]));
        assert_eq!(lm.mouth_right, Some([540, 470]));
    }

    #[test]
    fn test_from_points_none_visible() {
        assert!(FaceLandmarks::from_points(&[(0.0, 0.0); 5]).is_none());
    }

    #[test]
    fn test_from_points_partial() {
        let mut pts = [(0.0, 0.0); 5];
        pts[NOSE] = (100.4, 200.6);
        let lm = FaceLandmarks::from_points(&pts).unwrap();
        assert_eq!(lm.visible_count(), 1);
        assert_eq!(lm.nose, Some([100, 201]));
        assert!(lm.left_eye.is_none());
    }

    #[test]
    fn test_serialization_skips_invisible_points() {
        let mut pts = frontal_points();
        pts[MOUTH_LEFT] = (0.0, 0.0);
        let lm = FaceLandmarks::from_points(&pts).unwrap();
        let json = serde_json::to_value(&lm).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("left_eye"));
        assert!(!obj.contains_key("mouth_left"));
        assert_eq!(json["nose"], serde_json::json!([500, 420]));
    }
}
