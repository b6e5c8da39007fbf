use crate::detection::domain::detected_face::DetectedFace;
use crate::shared::frame::Frame;

pub type DetectError = Box<dyn std::error::Error + Send + Sync>;

/// Domain interface for face detection.
///
/// Implementations may be stateful (e.g. an inference session with scratch
/// buffers), hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectError>;
}
