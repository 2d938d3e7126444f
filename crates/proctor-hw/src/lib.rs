//! proctor-hw: frame sources.
//!
//! V4L2 webcam capture and decoding of uploaded images, both producing
//! grayscale [`Frame`]s for the evaluation pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
