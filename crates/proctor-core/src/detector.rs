//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Produces boxes,
//! scores and five landmarks in original frame coordinates.

use crate::alignment::sample_bilinear;
use crate::types::{Detection, FrameRef, Landmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    BadFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a frame.
///
/// An empty vector means "no faces"; `Err` means the detector itself failed.
pub trait Detector {
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<Detection>, DetectorError>;
}

/// Scale and padding applied when fitting the frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Input-tensor coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector (det_10g).
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = map_outputs(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_outputs,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Letterbox the frame into the square model input, normalized NCHW.
    fn preprocess(frame: FrameRef<'_>) -> (Array4<f32>, Letterbox) {
        let size = SCRFD_INPUT_SIZE;
        let lb = Letterbox::fit(frame.width as usize, frame.height as usize, size);
        let new_w = (frame.width as f32 * lb.scale).round() as usize;
        let new_h = (frame.height as f32 * lb.scale).round() as usize;
        let (x0, y0) = (lb.pad_x as usize, lb.pad_y as usize);
        let inv = 1.0 / lb.scale;

        // Padding is left at 0.0, i.e. the normalized mean.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..new_h.min(size - y0) {
            let src_y = ((y as f32 + 0.5) * inv - 0.5).clamp(0.0, frame.height as f32 - 1.0);
            for x in 0..new_w.min(size - x0) {
                let src_x = ((x as f32 + 0.5) * inv - 0.5).clamp(0.0, frame.width as f32 - 1.0);
                let pixel = sample_bilinear(frame, src_x, src_y).round();
                let v = (pixel - SCRFD_MEAN) / SCRFD_STD;
                for c in 0..3 {
                    tensor[[0, c, y0 + y, x0 + x]] = v;
                }
            }
        }

        (tensor, lb)
    }
}

impl Detector for FaceDetector {
    /// Detections sorted by confidence, highest first.
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<Detection>, DetectorError> {
        let expected = frame.width as usize * frame.height as usize;
        if expected == 0 || frame.data.len() < expected {
            return Err(DetectorError::BadFrame {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            });
        }

        let (input, letterbox) = Self::preprocess(frame);
        let data = input
            .as_slice()
            .ok_or_else(|| DetectorError::InferenceFailed("input tensor not contiguous".into()))?;
        let shape = [1usize, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE];

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view((shape, data))?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.stride_outputs.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let detections = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(count = detections.len(), "SCRFD detections");
        Ok(detections)
    }
}

/// Locate score/bbox/kps tensors per stride.
///
/// Exports either name them `score_8`, `bbox_16`, ... or use opaque numeric
/// names, in which case the standard order is
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match by_name.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Decode one stride's anchors into frame-space detections above the score floor.
fn decode_stride(scores: &[f32], bboxes: &[f32], kps: &[f32], stride: usize, lb: &Letterbox) -> Vec<Detection> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let s = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > SCRFD_SCORE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let b = bboxes.get(idx * 4..idx * 4 + 4)?;
            let k = kps.get(idx * 10..idx * 10 + 10)?;

            let (x1, y1) = lb.unmap(ax - b[0] * s, ay - b[1] * s);
            let (x2, y2) = lb.unmap(ax + b[2] * s, ay + b[3] * s);
            let points = std::array::from_fn(|i| lb.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s));

            Some(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence: score,
                landmarks: Landmarks(points),
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by confidence, descending.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width() * a.height() + b.width() * b.height() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
