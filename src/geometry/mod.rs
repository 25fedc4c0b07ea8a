//! Geometry utilities: SE3 transforms, reference planes, convex hulls.

pub mod hull;
pub mod plane;
pub mod se3;

pub use hull::{convex_hull, point_in_convex_polygon};
pub use plane::{Plane, PlaneSettings};
pub use se3::SE3;

/// Distance between the projection centers of two camera poses (T_wc).
pub fn compute_baseline(pose_a: &SE3, pose_b: &SE3) -> f64 {
    (pose_a.translation - pose_b.translation).norm()
}
