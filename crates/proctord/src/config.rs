use proctor_core::evaluator::DEFAULT_CONFIDENCE_FLOOR;
use proctor_core::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use proctor_core::pose::{DEFAULT_LEFT_THRESHOLD, DEFAULT_RIGHT_THRESHOLD};
use proctor_core::{CosineMatcher, EvaluatorConfig, FrameEvaluator, Gallery, PoseEstimator};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery embedding matrix (.npy).
    pub embeddings_path: PathBuf,
    /// Gallery labels (.json array or one per line).
    pub labels_path: PathBuf,
    /// Cosine similarity a match must exceed.
    pub similarity_threshold: f32,
    /// Minimum detector confidence for a face to count.
    pub confidence_floor: f32,
    /// Nose ratio below which the subject is looking right.
    pub pose_right_threshold: f32,
    /// Nose ratio above which the subject is looking left.
    pub pose_left_threshold: f32,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `PROCTOR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_addr: var("PROCTOR_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            model_dir: var("PROCTOR_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(proctor_core::default_model_dir),
            embeddings_path: var("PROCTOR_EMBEDDINGS")
                .unwrap_or_else(|| "all_train_embeddings.npy".to_string())
                .into(),
            labels_path: var("PROCTOR_LABELS")
                .unwrap_or_else(|| "all_train_labels.json".to_string())
                .into(),
            similarity_threshold: parsed(&var, "PROCTOR_SIMILARITY_THRESHOLD")
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            confidence_floor: parsed(&var, "PROCTOR_CONFIDENCE_FLOOR").unwrap_or(DEFAULT_CONFIDENCE_FLOOR),
            pose_right_threshold: parsed(&var, "PROCTOR_POSE_RIGHT").unwrap_or(DEFAULT_RIGHT_THRESHOLD),
            pose_left_threshold: parsed(&var, "PROCTOR_POSE_LEFT").unwrap_or(DEFAULT_LEFT_THRESHOLD),
            max_upload_bytes: parsed(&var, "PROCTOR_MAX_UPLOAD_BYTES").unwrap_or(10 * 1024 * 1024),
        }
    }

    /// Build the frame evaluator these settings describe.
    pub fn evaluator(&self, gallery: Arc<Gallery>) -> FrameEvaluator {
        FrameEvaluator::new(
            gallery,
            CosineMatcher::new(self.similarity_threshold),
            PoseEstimator::new(self.pose_right_threshold, self.pose_left_threshold),
            EvaluatorConfig {
                confidence_floor: self.confidence_floor,
                ..EvaluatorConfig::default()
            },
        )
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
