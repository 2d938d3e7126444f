//! ArcFace face embedder via ONNX Runtime.
//!
//! Aligns each face to the canonical 112×112 crop and extracts a
//! 512-dimensional, L2-normalized embedding (w600k_r50).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Detection, Embedding, FrameRef};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces one embedding per detected face.
pub trait Embedder {
    fn embed(&mut self, frame: FrameRef<'_>, face: &Detection) -> Result<Embedding, RecognizerError>;
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, RecognizerError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Aligned grayscale crop → NCHW tensor with the gray value replicated
    /// across all three channels.
    fn preprocess(aligned: &[u8]) -> Array4<f32> {
        let size = ALIGNED_SIZE;
        Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            (pixel - ARCFACE_MEAN) / ARCFACE_STD
        })
    }
}

impl Embedder for FaceRecognizer {
    fn embed(&mut self, frame: FrameRef<'_>, face: &Detection) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(frame, &face.landmarks);
        let input = Self::preprocess(&aligned);
        let data = input
            .as_slice()
            .ok_or_else(|| RecognizerError::InferenceFailed("input tensor not contiguous".into()))?;
        let shape = [1usize, 3, ALIGNED_SIZE, ALIGNED_SIZE];

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view((shape, data))?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let mut embedding = Embedding::new(raw.to_vec());
        let norm = embedding.norm();
        if norm > 0.0 {
            embedding.values.iter_mut().for_each(|v| *v = (f64::from(*v) / norm) as f32);
        }

        Ok(embedding)
    }
}
