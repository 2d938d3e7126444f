//! proctor-core: per-frame proctoring decisions.
//!
//! Detects faces with SCRFD, embeds them with ArcFace (both via ONNX Runtime),
//! resolves identities against a precomputed gallery by cosine similarity,
//! estimates coarse head pose from landmarks, and folds everything into one
//! session status per frame.

pub mod alignment;
pub mod detector;
pub mod evaluator;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod pose;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::{Detector, FaceDetector};
pub use evaluator::{
    AnomalyCheck, AnomalyPolicy, EvaluatorConfig, FaceOutcome, FaceResult, FrameEvaluator,
    FrameReport, FrameResult, FrameStatus, SkipReason, SkippedFace,
};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{CosineMatcher, Identity, IdentityMatch, MatchError, Matcher};
pub use pipeline::{Pipeline, PipelineError};
pub use pose::{HeadPose, PoseEstimator};
pub use recognizer::{Embedder, FaceRecognizer};
pub use types::{Detection, Embedding, FrameRef, Landmarks, PixelBox};

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Model directory: `$PROCTOR_MODEL_DIR`, else `$XDG_DATA_HOME/proctor/models`,
/// else `~/.local/share/proctor/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PROCTOR_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("proctor/models")
}
