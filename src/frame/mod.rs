//! Frame-level data: pinhole camera, posed images, depth maps.

pub mod camera;
pub mod depthmap;
pub mod image;
mod types;

pub use camera::PinholeCamera;
pub use depthmap::{Depthmap, INVALID_DEPTH, is_valid_depth};
pub use image::{RgbaImage, bilinear_sample_rgba};
pub use types::{CameraId, Frame, FrameId, SurfaceAssumption};
