//! ArcFace embedding extraction via ONNX Runtime.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::frame::Frame;
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // symmetric, unlike the detector
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace recognizer");
        Ok(Self { session })
    }

    /// Align the face at `landmarks` and return its L2-normalized embedding.
    pub fn embed(
        &mut self,
        frame: &Frame,
        landmarks: &[(f32, f32); 5],
    ) -> Result<Embedding, RecognizerError> {
        let crop = alignment::align_face(frame, landmarks);
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::normalized(raw.to_vec()))
    }
}

/// Convert a 112×112 RGB crop into a normalized NCHW tensor.
fn to_tensor(crop: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
    for (i, px) in crop.chunks_exact(3).enumerate() {
        let (y, x) = (i / ALIGNED_SIZE, i % ALIGNED_SIZE);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (f32::from(px[c]) - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_tensor_layout() {
        let mut crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
        // Pixel (x=3, y=1) is pure red.
        let i = (ALIGNED_SIZE + 3) * 3;
        crop[i] = 255;
        let t = to_tensor(&crop);
        assert_eq!(t.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
        assert!((t[[0, 0, 1, 3]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 1, 3]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceRecognizer::load(Path::new("/nonexistent/glintr100.onnx")).err();
        assert!(matches!(err, Some(RecognizerError::ModelNotFound(_))));
    }
}
