//! Synthetic nadir survey used by unit tests.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::{CameraId, Frame, FrameId, PinholeCamera, RgbaImage};
use crate::frame::image::Rgba;
use crate::geometry::SE3;

/// Flight altitude above the ground plane z = 0, meters.
pub const ALTITUDE: f64 = 50.0;

pub const IMAGE_WIDTH: u32 = 64;
pub const IMAGE_HEIGHT: u32 = 48;
pub const FOCAL: f64 = 60.0;

/// Nadir camera above (x, y) looking straight down.
pub fn nadir_camera(x: f64, y: f64, altitude: f64) -> PinholeCamera {
    PinholeCamera::new(
        FOCAL,
        FOCAL,
        IMAGE_WIDTH as f64 / 2.0,
        IMAGE_HEIGHT as f64 / 2.0,
        IMAGE_WIDTH,
        IMAGE_HEIGHT,
        SE3::nadir(Vector3::new(x, y, altitude)),
    )
    .unwrap()
}

/// Image whose red channel encodes the column and green channel the row.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

/// Random points on the ground plane inside the footprint of a camera at (x, 0).
pub fn ground_points(x: f64, count: usize, seed: u64) -> Vec<Vector3<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Footprint half extents at ALTITUDE are ~26 m x ~20 m.
    (0..count)
        .map(|_| {
            Vector3::new(
                x + rng.gen_range(-20.0..20.0),
                rng.gen_range(-15.0..15.0),
                0.0,
            )
        })
        .collect()
}

/// Keyframe of a survey line along x at [`ALTITUDE`], with ground points.
pub fn survey_frame(id: u64, camera_id: u32, x: f64) -> Frame {
    let camera = nadir_camera(x, 0.0, ALTITUDE);
    Frame::new(
        FrameId(id),
        CameraId(camera_id),
        1_000_000 * (id + 1),
        gradient_image(IMAGE_WIDTH, IMAGE_HEIGHT),
        camera,
    )
    .unwrap()
    .with_sparse_points(ground_points(x, 40, id))
}
