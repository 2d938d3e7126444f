//! Coarse head-pose classification from 2D landmark geometry.
//!
//! The nose's horizontal position within the eye span gives a yaw proxy:
//! about 0.5 for a frontal face, drifting toward 0 or 1 as the head turns.
//! Relies on landmark index 0 being the image-left eye; a detector with the
//! opposite convention flips LEFT and RIGHT.

use crate::types::Landmarks;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RIGHT_THRESHOLD: f32 = 0.35;
pub const DEFAULT_LEFT_THRESHOLD: f32 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeadPose {
    Center,
    /// Subject looking to their own left (nose toward image-right).
    LookingLeft,
    /// Subject looking to their own right (nose toward image-left).
    LookingRight,
    /// Landmarks too degenerate to classify.
    Unknown,
}

impl HeadPose {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeadPose::Center => "CENTER",
            HeadPose::LookingLeft => "LOOKING_LEFT",
            HeadPose::LookingRight => "LOOKING_RIGHT",
            HeadPose::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoseEstimator {
    /// Ratios strictly below this are `LookingRight`.
    pub right_threshold: f32,
    /// Ratios strictly above this are `LookingLeft`.
    pub left_threshold: f32,
}

impl Default for PoseEstimator {
    fn default() -> Self {
        Self {
            right_threshold: DEFAULT_RIGHT_THRESHOLD,
            left_threshold: DEFAULT_LEFT_THRESHOLD,
        }
    }
}

impl PoseEstimator {
    pub fn new(right_threshold: f32, left_threshold: f32) -> Self {
        Self {
            right_threshold,
            left_threshold,
        }
    }

    /// Nose position relative to the eye span, or `None` when the eyes are
    /// coincident or mirrored.
    pub fn nose_ratio(landmarks: &Landmarks) -> Option<f32> {
        let (left_x, _) = landmarks.left_eye();
        let (right_x, _) = landmarks.right_eye();
        let (nose_x, _) = landmarks.nose();

        let eye_width = right_x - left_x;
        if eye_width.is_nan() || eye_width <= 0.0 {
            return None;
        }

        let ratio = (nose_x - left_x) / eye_width;
        ratio.is_finite().then_some(ratio)
    }

    pub fn estimate(&self, landmarks: &Landmarks) -> HeadPose {
        let Some(ratio) = Self::nose_ratio(landmarks) else {
            return HeadPose::Unknown;
        };

        if ratio < self.right_threshold {
            HeadPose::LookingRight
        } else if ratio > self.left_threshold {
            HeadPose::LookingLeft
        } else {
            HeadPose::Center
        }
    }
}
