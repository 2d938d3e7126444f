//! Detector → evaluator chain shared by the daemon and the CLI.

use crate::detector::{Detector, DetectorError, FaceDetector};
use crate::evaluator::{FrameEvaluator, FrameResult};
use crate::matcher::Matcher;
use crate::recognizer::{Embedder, FaceRecognizer, RecognizerError};
use crate::types::FrameRef;
use crate::{ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Owns the model collaborators and runs one frame at a time.
pub struct Pipeline<D, E, M> {
    detector: D,
    embedder: E,
    evaluator: FrameEvaluator<M>,
}

impl<M: Matcher> Pipeline<FaceDetector, FaceRecognizer, M> {
    /// Load SCRFD and ArcFace from `model_dir`.
    pub fn load(model_dir: impl AsRef<Path>, evaluator: FrameEvaluator<M>) -> Result<Self, PipelineError> {
        let model_dir = model_dir.as_ref();
        let detector = FaceDetector::load(model_dir.join(SCRFD_MODEL_FILE))?;
        let embedder = FaceRecognizer::load(model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self::new(detector, embedder, evaluator))
    }
}

impl<D: Detector, E: Embedder, M: Matcher> Pipeline<D, E, M> {
    pub fn new(detector: D, embedder: E, evaluator: FrameEvaluator<M>) -> Self {
        Self {
            detector,
            embedder,
            evaluator,
        }
    }

    pub fn evaluator(&self) -> &FrameEvaluator<M> {
        &self.evaluator
    }

    /// Detect and evaluate one frame. Only a detector failure fails the frame.
    pub fn run(&mut self, frame: FrameRef<'_>) -> Result<FrameResult, PipelineError> {
        let detections = self.detector.detect(frame)?;
        Ok(self.evaluator.evaluate(frame, &detections, &mut self.embedder))
    }
}
