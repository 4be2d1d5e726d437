//! Detection + embedding oracle.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Detection};
use std::path::Path;
use thiserror::Error;

/// Default antelopev2 detector file name.
pub const DEFAULT_DETECTOR_MODEL: &str = "scrfd_10g_bnkps.onnx";
/// Default antelopev2 recognizer file name.
pub const DEFAULT_RECOGNIZER_MODEL: &str = "glintr100.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in a frame and computes an identity embedding for each.
///
/// Implementations must be deterministic per frame. Detections are returned
/// in the detector's own order; embeddings are L2-normalized.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError>;
}

/// SCRFD + ArcFace analyzer running on ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing or invalid.
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
        let candidates = self.detector.detect(frame)?;
        tracing::debug!(faces = candidates.len(), "detector finished");

        let mut detections = Vec::with_capacity(candidates.len());
        for face in candidates {
            let bbox = BoundingBox::from_corners(face.x1, face.y1, face.x2, face.y2);
            if !bbox.is_valid() {
                tracing::debug!(?bbox, "dropping degenerate face box");
                continue;
            }
            let embedding = self.recognizer.embed(frame, &face.landmarks)?;
            detections.push(Detection {
                bbox,
                embedding,
                confidence: face.score,
            });
        }
        Ok(detections)
    }
}
