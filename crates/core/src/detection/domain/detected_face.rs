//! Geometry reported to clients for each detected face.

use serde::Serialize;

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Builds a box from corner coordinates, clamped to the frame.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64, frame_w: u32, frame_h: u32) -> Self {
        let x1 = x1.clamp(0.0, frame_w as f64);
        let y1 = y1.clamp(0.0, frame_h as f64);
        let x2 = x2.clamp(0.0, frame_w as f64);
        let y2 = y2.clamp(0.0, frame_h as f64);
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    Nose,
    MouthLeft,
    MouthRight,
}

impl LandmarkKind {
    /// Keypoint order emitted by 5-point face models.
    pub const ORDER: [LandmarkKind; 5] = [
        LandmarkKind::LeftEye,
        LandmarkKind::RightEye,
        LandmarkKind::Nose,
        LandmarkKind::MouthLeft,
        LandmarkKind::MouthRight,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub x: f64,
    pub y: f64,
}

/// One face found in a frame. Landmarks below the keypoint confidence
/// threshold are omitted, so the list may hold fewer than five points.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub score: f64,
    pub landmarks: Vec<Landmark>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_corners_clamps_to_frame() {
        let b = BoundingBox::from_corners(-10.0, 5.0, 120.0, 50.0, 100, 100);
        assert_relative_eq!(b.x, 0.0);
        assert_relative_eq!(b.y, 5.0);
        assert_relative_eq!(b.width, 100.0);
        assert_relative_eq!(b.height, 45.0);
    }

    #[test]
    fn test_from_corners_inverted_is_empty() {
        let b = BoundingBox::from_corners(50.0, 50.0, 40.0, 40.0, 100, 100);
        assert_relative_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_serializes_with_client_field_names() {
        let face = DetectedFace {
            bounding_box: BoundingBox {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0,
            },
            score: 0.5,
            landmarks: vec![Landmark {
                kind: LandmarkKind::MouthLeft,
                x: 1.5,
                y: 2.5,
            }],
        };
        let json = serde_json::to_value(&face).unwrap();
        assert_eq!(json["box"]["width"], 3.0);
        assert_eq!(json["score"], 0.5);
        assert_eq!(json["landmarks"][0]["kind"], "mouth_left");
    }
}
