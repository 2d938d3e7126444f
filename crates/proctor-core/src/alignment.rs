//! Face alignment to the ArcFace canonical 112×112 crop.
//!
//! Fits a 4-DOF similarity transform (scale, rotation, translation) from the
//! detected five landmarks onto the InsightFace reference points, then warps
//! the grayscale frame through it.

use crate::types::{FrameRef, Landmarks};

pub const ALIGNED_SIZE: usize = 112;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Similarity transform `dst = [[a, -b], [b, a]] · src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Closed form: center both point sets, then `a` and `b` are the
    /// projections of the cross-covariance onto the rotation basis divided by
    /// the source variance. Returns `None` when all source points coincide.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let mut var = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - smx, sy - smy);
            let (dx, dy) = (dx - dmx, dy - dmy);
            var += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if var < 1e-12 {
            return None;
        }

        let a = dot / var;
        let b = cross / var;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        // Inverse translation is -R⁻¹·t.
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample at a sub-pixel position; pixels outside the frame read as 0.
pub(crate) fn sample_bilinear(frame: FrameRef<'_>, x: f32, y: f32) -> f32 {
    let (w, h) = (frame.width as i64, frame.height as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |px: i64, py: i64| -> f32 {
        if (0..w).contains(&px) && (0..h).contains(&py) {
            frame
                .data
                .get((py * w + px) as usize)
                .copied()
                .unwrap_or(0) as f32
        } else {
            0.0
        }
    };

    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1, y0) * fx;
    let bottom = px(x0, y0 + 1) * (1.0 - fx) + px(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Align a detected face to a canonical 112×112 grayscale crop.
///
/// Degenerate landmarks (all points coincident) produce an all-black crop.
pub fn align_face(frame: FrameRef<'_>, landmarks: &Landmarks) -> Vec<u8> {
    let mut output = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];

    let Some(inverse) =
        Similarity::fit(landmarks.points(), &REFERENCE_LANDMARKS_112).and_then(|m| m.invert())
    else {
        tracing::debug!("degenerate landmarks; alignment produced a blank crop");
        return output;
    };

    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = inverse.apply((ox as f32, oy as f32));
            output[oy * ALIGNED_SIZE + ox] = sample_bilinear(frame, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}
