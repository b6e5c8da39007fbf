use std::sync::Arc;

use crate::detection::domain::detected_face::DetectedFace;
use crate::detection::infrastructure::detector_service::{DetectorError, DetectorService};
use crate::pipeline::protocol::ServerMessage;
use crate::stream::decoder_process::Generation;
use crate::stream::frame_demuxer::EncodedFrame;
use crate::video::domain::image_decoder::ImageDecoder;

#[derive(Clone, Debug, PartialEq)]
pub enum DetectionResult {
    Faces(Vec<DetectedFace>),
    /// Detection (or model load) failed; reported to the client as no faces.
    DetectionFailed(String),
    /// The frame could not be decoded; nothing is reported.
    DecodeFailed(String),
}

/// Result of one dispatched frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionOutcome {
    pub generation: Generation,
    pub sequence: u64,
    pub result: DetectionResult,
}

impl DetectionOutcome {
    /// The client notification for this outcome, if any.
    pub fn into_message(self) -> Option<ServerMessage> {
        let faces = match self.result {
            DetectionResult::Faces(faces) => faces,
            DetectionResult::DetectionFailed(_) => Vec::new(),
            DetectionResult::DecodeFailed(_) => return None,
        };
        Some(ServerMessage::FacesDetected {
            frame_number: self.sequence,
            faces,
        })
    }
}

/// Decodes one frame and runs detection on it.
///
/// Never fails: every problem becomes a [`DetectionResult`] variant.
#[derive(Clone)]
pub struct FrameDispatcher {
    decoder: Arc<dyn ImageDecoder>,
    detector: Arc<DetectorService>,
}

impl FrameDispatcher {
    pub fn new(decoder: Arc<dyn ImageDecoder>, detector: Arc<DetectorService>) -> Self {
        Self { decoder, detector }
    }

    pub async fn dispatch(
        &self,
        frame: EncodedFrame,
        sequence: u64,
        generation: Generation,
    ) -> DetectionOutcome {
        let result = match self.detector.ensure_ready().await {
            Ok(()) => self.run(frame, sequence).await,
            // Already logged once by the failed load.
            Err(e @ DetectorError::RetryPending(_)) => {
                log::debug!("Frame {sequence}: {e}");
                DetectionResult::DetectionFailed(e.to_string())
            }
            Err(e) => DetectionResult::DetectionFailed(e.to_string()),
        };
        match &result {
            DetectionResult::Faces(faces) => {
                log::trace!("Frame {sequence}: {} face(s)", faces.len())
            }
            DetectionResult::DetectionFailed(reason) => {
                log::warn!("Frame {sequence}: detection failed: {reason}")
            }
            DetectionResult::DecodeFailed(reason) => {
                log::warn!("Frame {sequence}: decode failed: {reason}")
            }
        }
        DetectionOutcome {
            generation,
            sequence,
            result,
        }
    }

    async fn run(&self, frame: EncodedFrame, sequence: u64) -> DetectionResult {
        let decoder = Arc::clone(&self.decoder);
        let detector = Arc::clone(&self.detector);
        let task = tokio::task::spawn_blocking(move || {
            let raster = match decoder.decode(&frame, sequence) {
                Ok(raster) => raster,
                Err(e) => return DetectionResult::DecodeFailed(e.to_string()),
            };
            match detector.detect_blocking(&raster) {
                Ok(faces) => DetectionResult::Faces(faces),
                Err(e) => DetectionResult::DetectionFailed(e.to_string()),
            }
        });

        task.await
            .unwrap_or_else(|e| DetectionResult::DetectionFailed(format!("dispatch task: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::detection::domain::detected_face::BoundingBox;
    use crate::detection::domain::face_detector::{DetectError, FaceDetector};
    use crate::shared::frame::Frame;
    use crate::video::domain::image_decoder::DecodeError;

    /// Byte that makes [`StubDecoder`] reject a frame.
    pub const UNDECODABLE: u8 = 0xEE;

    /// Accepts any payload as a 4x4 raster unless it contains [`UNDECODABLE`].
    pub struct StubDecoder;

    impl ImageDecoder for StubDecoder {
        fn decode(&self, encoded: &[u8], sequence: u64) -> Result<Frame, DecodeError> {
            if encoded.contains(&UNDECODABLE) {
                return Err(DecodeError::Empty);
            }
            Ok(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, sequence))
        }
    }

    pub fn face(score: f64) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox {
                x: 1.0,
                y: 1.0,
                width: 2.0,
                height: 2.0,
            },
            score,
            landmarks: Vec::new(),
        }
    }

    /// Returns one face per frame; fails frames whose sequence is in `fail_on`.
    pub struct OneFaceDetector {
        pub fail_on: Vec<u64>,
    }

    impl OneFaceDetector {
        pub fn new() -> Self {
            Self {
                fail_on: Vec::new(),
            }
        }
    }

    impl FaceDetector for OneFaceDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectError> {
            if self.fail_on.contains(&frame.sequence()) {
                return Err(format!("inference on frame {} failed", frame.sequence()).into());
            }
            Ok(vec![face(0.9)])
        }
    }

    pub fn dispatcher_with(detector: impl FaceDetector + 'static) -> FrameDispatcher {
        FrameDispatcher::new(
            Arc::new(StubDecoder),
            Arc::new(DetectorService::with_detector(Box::new(detector))),
        )
    }
}
