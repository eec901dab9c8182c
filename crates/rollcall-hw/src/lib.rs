//! rollcall-hw: Camera capture for attendance sessions.
//!
//! Provides V4L2-based camera access and the grayscale [`Frame`] type with
//! the downscale, crop and annotation helpers sessions use.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, OpenCamera, PixelFormat, V4l2Opener};
pub use frame::Frame;
