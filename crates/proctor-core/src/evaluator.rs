//! Per-frame session evaluation.
//!
//! Turns one frame's detections into per-face outcomes (pose + identity) and
//! a single session status. Frames are independent: there is no state carried
//! from one call to the next.

use crate::gallery::Gallery;
use crate::matcher::{CosineMatcher, Identity, Matcher};
use crate::pose::{HeadPose, PoseEstimator};
use crate::recognizer::Embedder;
use crate::types::{Detection, FrameRef, PixelBox};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Minimum detector confidence for a detection to count as a face.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.95;

/// Frame-level session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameStatus {
    Clean,
    NoFace,
    MultipleFaces,
    UnknownUser,
    LookingAway,
}

impl FrameStatus {
    pub fn code(&self) -> &'static str {
        match self {
            FrameStatus::Clean => "CLEAN",
            FrameStatus::NoFace => "NO_FACE",
            FrameStatus::MultipleFaces => "MULTIPLE_FACES",
            FrameStatus::UnknownUser => "UNKNOWN_USER",
            FrameStatus::LookingAway => "LOOKING_AWAY",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            FrameStatus::Clean => "Session normal",
            FrameStatus::NoFace => "No face detected in frame",
            FrameStatus::MultipleFaces => "Multiple people detected!",
            FrameStatus::UnknownUser => "Unregistered user detected",
            FrameStatus::LookingAway => "User looking away!",
        }
    }
}

/// A single-face anomaly that can replace a `Clean` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyCheck {
    /// Face did not match any gallery identity.
    UnknownIdentity,
    /// Head pose is anything other than `Center`.
    LookingAway,
}

impl AnomalyCheck {
    fn applies_to(&self, face: &FaceResult) -> bool {
        match self {
            AnomalyCheck::UnknownIdentity => face.identity.is_unknown(),
            AnomalyCheck::LookingAway => face.pose != HeadPose::Center,
        }
    }

    pub fn status(&self) -> FrameStatus {
        match self {
            AnomalyCheck::UnknownIdentity => FrameStatus::UnknownUser,
            AnomalyCheck::LookingAway => FrameStatus::LookingAway,
        }
    }
}

/// Ordered anomaly checks for the single-face case; the first that applies wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyPolicy {
    checks: Vec<AnomalyCheck>,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            checks: vec![AnomalyCheck::UnknownIdentity, AnomalyCheck::LookingAway],
        }
    }
}

impl AnomalyPolicy {
    pub fn new(checks: Vec<AnomalyCheck>) -> Self {
        Self { checks }
    }

    pub fn checks(&self) -> &[AnomalyCheck] {
        &self.checks
    }

    pub fn first_match(&self, face: &FaceResult) -> Option<FrameStatus> {
        self.checks
            .iter()
            .find(|check| check.applies_to(face))
            .map(AnomalyCheck::status)
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub confidence_floor: f32,
    pub policy: AnomalyPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            policy: AnomalyPolicy::default(),
        }
    }
}

/// One fully processed face.
#[derive(Debug, Clone, Serialize)]
pub struct FaceResult {
    #[serde(rename = "box")]
    pub bbox: PixelBox,
    #[serde(rename = "name")]
    pub identity: Identity,
    /// Cosine similarity of the best gallery match.
    #[serde(rename = "confidence")]
    pub similarity: f32,
    pub pose: HeadPose,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("clamped box is empty")]
    EmptyRegion,
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("matching failed: {0}")]
    Match(String),
}

/// A valid detection that produced no `FaceResult`.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFace {
    /// Position among the detections that passed the confidence floor.
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub enum FaceOutcome {
    Evaluated(FaceResult),
    Skipped(SkippedFace),
}

/// Everything one evaluation produced, in face processing order.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub outcomes: Vec<FaceOutcome>,
    pub status: FrameStatus,
}

impl FrameResult {
    fn no_face() -> Self {
        Self {
            outcomes: Vec::new(),
            status: FrameStatus::NoFace,
        }
    }

    pub fn message(&self) -> &'static str {
        self.status.message()
    }

    pub fn is_violation(&self) -> bool {
        self.status != FrameStatus::Clean
    }

    pub fn results(&self) -> impl Iterator<Item = &FaceResult> {
        self.outcomes.iter().filter_map(|o| match o {
            FaceOutcome::Evaluated(face) => Some(face),
            FaceOutcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedFace> {
        self.outcomes.iter().filter_map(|o| match o {
            FaceOutcome::Skipped(skip) => Some(skip),
            FaceOutcome::Evaluated(_) => None,
        })
    }

    /// Serializable view: `{results, skipped, status, message}`.
    pub fn report(&self) -> FrameReport<'_> {
        FrameReport {
            results: self.results().collect(),
            skipped: self.skipped().collect(),
            status: self.status,
            message: self.message(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FrameReport<'a> {
    pub results: Vec<&'a FaceResult>,
    pub skipped: Vec<&'a SkippedFace>,
    pub status: FrameStatus,
    pub message: &'static str,
}

/// Combines pose estimation and identity matching into a frame status.
///
/// Holds the gallery behind an `Arc`; evaluation only reads it, so one
/// evaluator can be shared across threads.
pub struct FrameEvaluator<M = CosineMatcher> {
    gallery: Arc<Gallery>,
    matcher: M,
    pose: PoseEstimator,
    config: EvaluatorConfig,
}

impl<M: Matcher> FrameEvaluator<M> {
    pub fn new(gallery: Arc<Gallery>, matcher: M, pose: PoseEstimator, config: EvaluatorConfig) -> Self {
        Self {
            gallery,
            matcher,
            pose,
            config,
        }
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        frame: FrameRef<'_>,
        detections: &[Detection],
        embedder: &mut dyn Embedder,
    ) -> FrameResult {
        let valid: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.confidence_floor)
            .collect();

        tracing::debug!(
            detected = detections.len(),
            valid = valid.len(),
            floor = self.config.confidence_floor,
            "filtered detections"
        );

        if valid.is_empty() {
            return FrameResult::no_face();
        }

        let single = valid.len() == 1;
        let mut status = if single {
            FrameStatus::Clean
        } else {
            FrameStatus::MultipleFaces
        };

        let mut outcomes = Vec::with_capacity(valid.len());
        for (index, detection) in valid.into_iter().enumerate() {
            let outcome = self.evaluate_face(frame, index, detection, embedder);

            if let FaceOutcome::Evaluated(face) = &outcome {
                if single && status == FrameStatus::Clean {
                    if let Some(anomaly) = self.config.policy.first_match(face) {
                        status = anomaly;
                    }
                }
            }
            outcomes.push(outcome);
        }

        tracing::debug!(status = status.code(), faces = outcomes.len(), "frame evaluated");

        FrameResult { outcomes, status }
    }

    fn evaluate_face(
        &self,
        frame: FrameRef<'_>,
        index: usize,
        detection: &Detection,
        embedder: &mut dyn Embedder,
    ) -> FaceOutcome {
        let skip = |reason| FaceOutcome::Skipped(SkippedFace { index, reason });

        let Some(bbox) = detection.clamp_to(frame.width, frame.height) else {
            tracing::debug!(index, "face box empty after clamping; skipped");
            return skip(SkipReason::EmptyRegion);
        };

        let pose = self.pose.estimate(&detection.landmarks);

        let embedding = match embedder.embed(frame, detection) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(index, error = %e, "embedding failed; face skipped");
                return skip(SkipReason::Embedding(e.to_string()));
            }
        };

        let matched = match self.matcher.resolve(&embedding, &self.gallery) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(index, error = %e, "matching failed; face skipped");
                return skip(SkipReason::Match(e.to_string()));
            }
        };

        FaceOutcome::Evaluated(FaceResult {
            bbox,
            identity: matched.identity,
            similarity: matched.similarity,
            pose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::RecognizerError;
    use crate::types::{Embedding, Landmarks};
    use ndarray::array;
    use std::collections::VecDeque;

    const W: u32 = 640;
    const H: u32 = 480;

    /// Replays a fixed sequence of embed results, one per call.
    struct ScriptedEmbedder {
        script: VecDeque<Result<Vec<f32>, RecognizerError>>,
        calls: usize,
    }

    impl ScriptedEmbedder {
        fn new(script: Vec<Result<Vec<f32>, RecognizerError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }

        fn always(values: Vec<f32>, n: usize) -> Self {
            Self::new((0..n).map(|_| Ok(values.clone())).collect())
        }
    }

    impl Embedder for ScriptedEmbedder {
        fn embed(&mut self, _frame: FrameRef<'_>, _face: &Detection) -> Result<Embedding, RecognizerError> {
            self.calls += 1;
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(RecognizerError::InferenceFailed("script exhausted".into())))
                .map(Embedding::new)
        }
    }

    const ALICE: [f32; 2] = [1.0, 0.0];
    const STRANGER: [f32; 2] = [0.0, 1.0];

    fn evaluator(gallery: Gallery) -> FrameEvaluator {
        FrameEvaluator::new(
            Arc::new(gallery),
            CosineMatcher::default(),
            PoseEstimator::default(),
            EvaluatorConfig::default(),
        )
    }

    fn alice_gallery() -> Gallery {
        Gallery::from_parts(array![[1.0, 0.0]], vec!["alice".into()]).unwrap()
    }

    /// Face box at (x, 100)-(x+100, 220) with the nose at `ratio` of the eye span.
    fn face_at(x: f32, confidence: f32, ratio: f32) -> Detection {
        Detection {
            x1: x,
            y1: 100.0,
            x2: x + 100.0,
            y2: 220.0,
            confidence,
            landmarks: Landmarks([
                (x + 30.0, 140.0),
                (x + 70.0, 140.0),
                (x + 30.0 + 40.0 * ratio, 165.0),
                (x + 35.0, 190.0),
                (x + 65.0, 190.0),
            ]),
        }
    }

    fn run(eval: &FrameEvaluator, detections: &[Detection], embedder: &mut ScriptedEmbedder) -> FrameResult {
        let pixels = vec![0u8; (W * H) as usize];
        eval.evaluate(FrameRef::new(&pixels, W, H), detections, embedder)
    }

    #[test]
    fn test_no_detections() {
        let mut emb = ScriptedEmbedder::new(vec![]);
        let r = run(&evaluator(alice_gallery()), &[], &mut emb);
        assert_eq!(r.status, FrameStatus::NoFace);
        assert_eq!(r.message(), "No face detected in frame");
        assert!(r.outcomes.is_empty());
        assert_eq!(emb.calls, 0);
    }

    #[test]
    fn test_all_below_floor() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 2);
        let dets = [face_at(50.0, 0.94, 0.5), face_at(300.0, 0.5, 0.5)];
        let r = run(&evaluator(alice_gallery()), &dets, &mut emb);
        assert_eq!(r.status, FrameStatus::NoFace);
        assert_eq!(r.results().count(), 0);
        assert_eq!(emb.calls, 0);
    }

    #[test]
    fn test_floor_is_inclusive() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.95, 0.5)], &mut emb);
        assert_eq!(r.status, FrameStatus::Clean);
    }

    #[test]
    fn test_clean_single_face() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.5)], &mut emb);
        assert_eq!(r.status, FrameStatus::Clean);
        assert_eq!(r.message(), "Session normal");
        assert!(!r.is_violation());

        let faces: Vec<_> = r.results().collect();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].identity, Identity::Known("alice".into()));
        assert_eq!(faces[0].pose, HeadPose::Center);
        assert_eq!(faces[0].bbox, PixelBox { x1: 50, y1: 100, x2: 150, y2: 220 });
    }

    #[test]
    fn test_single_unknown_face() {
        let mut emb = ScriptedEmbedder::always(STRANGER.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.5)], &mut emb);
        assert_eq!(r.status, FrameStatus::UnknownUser);
        assert_eq!(r.message(), "Unregistered user detected");
    }

    #[test]
    fn test_looking_away_known_face() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.9)], &mut emb);
        assert_eq!(r.status, FrameStatus::LookingAway);
        assert_eq!(r.message(), "User looking away!");

        let faces: Vec<_> = r.results().collect();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].pose, HeadPose::LookingLeft);
        assert_eq!(faces[0].identity.as_str(), "alice");
    }

    #[test]
    fn test_looking_right_is_looking_away() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.1)], &mut emb);
        assert_eq!(r.status, FrameStatus::LookingAway);
        assert_eq!(r.results().next().unwrap().pose, HeadPose::LookingRight);
    }

    #[test]
    fn test_unknown_identity_outranks_looking_away() {
        let mut emb = ScriptedEmbedder::always(STRANGER.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.9)], &mut emb);
        assert_eq!(r.status, FrameStatus::UnknownUser);
    }

    #[test]
    fn test_policy_order_is_configurable() {
        let eval = FrameEvaluator::new(
            Arc::new(alice_gallery()),
            CosineMatcher::default(),
            PoseEstimator::default(),
            EvaluatorConfig {
                policy: AnomalyPolicy::new(vec![AnomalyCheck::LookingAway, AnomalyCheck::UnknownIdentity]),
                ..EvaluatorConfig::default()
            },
        );
        let mut emb = ScriptedEmbedder::always(STRANGER.to_vec(), 1);
        let r = run(&eval, &[face_at(50.0, 0.99, 0.9)], &mut emb);
        assert_eq!(r.status, FrameStatus::LookingAway);
    }

    #[test]
    fn test_degenerate_pose_counts_as_looking_away() {
        let mut det = face_at(50.0, 0.99, 0.5);
        det.landmarks.0.swap(0, 1);
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[det], &mut emb);
        assert_eq!(r.results().next().unwrap().pose, HeadPose::Unknown);
        assert_eq!(r.status, FrameStatus::LookingAway);
    }

    #[test]
    fn test_multiple_faces() {
        let mut emb = ScriptedEmbedder::new(vec![Ok(STRANGER.to_vec()), Ok(ALICE.to_vec())]);
        let dets = [face_at(50.0, 0.99, 0.9), face_at(300.0, 0.96, 0.5)];
        let r = run(&evaluator(alice_gallery()), &dets, &mut emb);
        assert_eq!(r.status, FrameStatus::MultipleFaces);
        assert_eq!(r.message(), "Multiple people detected!");
        assert_eq!(r.results().count(), 2);
        assert_eq!(emb.calls, 2);
    }

    #[test]
    fn test_multiple_faces_ignores_low_confidence_extras() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let dets = [face_at(50.0, 0.99, 0.5), face_at(300.0, 0.80, 0.5)];
        let r = run(&evaluator(alice_gallery()), &dets, &mut emb);
        assert_eq!(r.status, FrameStatus::Clean);
        assert_eq!(r.results().count(), 1);
    }

    #[test]
    fn test_multiple_faces_counts_only_non_empty_boxes() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 2);
        let dets = [
            face_at(50.0, 0.99, 0.5),
            face_at(900.0, 0.99, 0.5), // entirely right of the frame
            face_at(300.0, 0.99, 0.5),
        ];
        let r = run(&evaluator(alice_gallery()), &dets, &mut emb);
        assert_eq!(r.status, FrameStatus::MultipleFaces);
        assert_eq!(r.results().count(), 2);

        let skipped: Vec<_> = r.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].index, 1);
        assert_eq!(skipped[0].reason, SkipReason::EmptyRegion);
        assert_eq!(emb.calls, 2);
    }

    #[test]
    fn test_empty_region_single_face_stays_clean() {
        let mut emb = ScriptedEmbedder::always(STRANGER.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(-500.0, 0.99, 0.9)], &mut emb);
        assert_eq!(r.status, FrameStatus::Clean);
        assert_eq!(r.results().count(), 0);
        assert_eq!(r.skipped().count(), 1);
        assert_eq!(emb.calls, 0);
    }

    #[test]
    fn test_embedding_failure_isolated_to_face() {
        let mut emb = ScriptedEmbedder::new(vec![
            Err(RecognizerError::InferenceFailed("bad crop".into())),
            Ok(ALICE.to_vec()),
        ]);
        let dets = [face_at(50.0, 0.99, 0.5), face_at(300.0, 0.99, 0.5)];
        let r = run(&evaluator(alice_gallery()), &dets, &mut emb);

        assert_eq!(r.status, FrameStatus::MultipleFaces);
        assert_eq!(r.results().count(), 1);
        let skipped: Vec<_> = r.skipped().collect();
        assert_eq!(skipped[0].index, 0);
        assert!(matches!(&skipped[0].reason, SkipReason::Embedding(msg) if msg.contains("bad crop")));
    }

    #[test]
    fn test_match_failure_does_not_change_status() {
        let mut emb = ScriptedEmbedder::always(vec![0.0, 0.0], 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.9)], &mut emb);
        assert_eq!(r.status, FrameStatus::Clean);
        assert!(matches!(r.skipped().next().unwrap().reason, SkipReason::Match(_)));
    }

    #[test]
    fn test_unready_gallery_reports_db_error() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(Gallery::unavailable("missing")), &[face_at(50.0, 0.99, 0.5)], &mut emb);
        let face = r.results().next().unwrap();
        assert_eq!(face.identity, Identity::DbError);
        assert_eq!(face.similarity, 0.0);
        assert_eq!(r.status, FrameStatus::Clean);
    }

    #[test]
    fn test_report_shape() {
        let mut emb = ScriptedEmbedder::always(ALICE.to_vec(), 1);
        let r = run(&evaluator(alice_gallery()), &[face_at(50.0, 0.99, 0.5)], &mut emb);
        let json = serde_json::to_value(r.report()).unwrap();

        assert_eq!(json["status"], "CLEAN");
        assert_eq!(json["message"], "Session normal");
        assert_eq!(json["results"][0]["box"], serde_json::json!([50, 100, 150, 220]));
        assert_eq!(json["results"][0]["name"], "alice");
        assert_eq!(json["results"][0]["pose"], "CENTER");
        assert!((json["results"][0]["confidence"].as_f64().unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(json["skipped"], serde_json::json!([]));
    }

    #[test]
    fn test_skip_reason_serialization() {
        let json = serde_json::to_value(SkippedFace {
            index: 2,
            reason: SkipReason::Embedding("oops".into()),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"index": 2, "reason": {"kind": "embedding", "detail": "oops"}}));
    }

    #[test]
    fn test_status_codes_match_serde() {
        for s in [
            FrameStatus::Clean,
            FrameStatus::NoFace,
            FrameStatus::MultipleFaces,
            FrameStatus::UnknownUser,
            FrameStatus::LookingAway,
        ] {
            assert_eq!(serde_json::to_value(s).unwrap(), s.code());
        }
    }
}
