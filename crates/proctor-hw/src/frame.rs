//! Grayscale frame type, YUYV conversion, dark-frame detection and decoding
//! of encoded images (JPEG, PNG, ...) into frames.

use std::path::Path;

/// A grayscale frame, either captured from a camera or decoded from an upload.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number; 0 for decoded images.
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap an already-decoded grayscale buffer.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if expected == 0 {
            return Err(FrameError::Empty);
        }
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, DARK_FRAME_FRACTION);
        Ok(Self {
            data,
            width,
            height,
            sequence: 0,
            is_dark,
        })
    }

    /// Decode an encoded image (any format the `image` crate recognizes).
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)?;
        let gray = img.into_luma8();
        let (width, height) = gray.dimensions();
        Self::from_gray(gray.into_raw(), width, height)
    }

    /// Read and decode an image file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let gray = image::open(path)?.into_luma8();
        let (width, height) = gray.dimensions();
        Self::from_gray(gray.into_raw(), width, height)
    }
}

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image has no pixels")]
    Empty,
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_grayscale(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![10u8; 940];
        borderline.extend([128u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }

    #[test]
    fn test_decode_png_to_gray() {
        let img = RgbImage::from_pixel(8, 6, Rgb([200, 200, 200]));
        let frame = Frame::decode(&encode_png(&img)).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.data.len(), 48);
        assert!(frame.data.iter().all(|&p| p == 200));
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(Frame::decode(b"definitely not an image"), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        GrayImage::from_pixel(4, 4, Luma([5])).save(&path).unwrap();

        let frame = Frame::open(&path).unwrap();
        assert_eq!(frame.data, vec![5u8; 16]);
        assert!(frame.is_dark);
    }

    #[test]
    fn test_from_gray_length_check() {
        assert!(matches!(Frame::from_gray(vec![0; 5], 2, 2), Err(FrameError::InvalidLength { .. })));
        assert!(matches!(Frame::from_gray(vec![], 0, 3), Err(FrameError::Empty)));
    }
}
