use serde::{Deserialize, Serialize};

/// Borrowed grayscale frame (`width * height` bytes, row-major).
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> FrameRef<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self { data, width, height }
    }
}

/// Five-point facial landmarks in detector order:
/// [left_eye, right_eye, nose, left_mouth, right_mouth].
///
/// "Left" is the image-left side, i.e. the subject's own right eye when the
/// camera is not mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks(pub [(f32, f32); 5]);

impl Landmarks {
    pub fn left_eye(&self) -> (f32, f32) {
        self.0[0]
    }

    pub fn right_eye(&self) -> (f32, f32) {
        self.0[1]
    }

    pub fn nose(&self) -> (f32, f32) {
        self.0[2]
    }

    pub fn points(&self) -> &[(f32, f32); 5] {
        &self.0
    }
}

/// A face found by the detector, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
    pub landmarks: Landmarks,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Clamp the box to the frame, truncating to whole pixels.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelBox> {
        // `as` saturates, so NaN becomes 0 and huge values stay in range.
        let x1 = (self.x1 as i64).max(0);
        let y1 = (self.y1 as i64).max(0);
        let x2 = (self.x2 as i64).min(width as i64);
        let y2 = (self.y2 as i64).min(height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(PixelBox {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }
}

/// Box clamped to frame bounds: `0 <= x1 < x2 <= width`, `0 <= y1 < y2 <= height`.
///
/// Serializes as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "[u32; 4]", from = "[u32; 4]")]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl From<PixelBox> for [u32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl From<[u32; 4]> for PixelBox {
    fn from(v: [u32; 4]) -> Self {
        Self { x1: v[0], y1: v[1], x2: v[2], y2: v[3] }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// L2 norm of the vector. See [`l2_norm`].
    pub fn norm(&self) -> f64 {
        l2_norm(&self.values)
    }
}

/// L2 norm with the squares summed in f64, so it is finite and non-zero for
/// every finite, non-zero f32 vector.
pub fn l2_norm<'a>(values: impl IntoIterator<Item = &'a f32>) -> f64 {
    values
        .into_iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}
