//! SE3: 6-DOF rigid body transformation (rotation + translation).
//!
//! Camera poses are stored as `T_wc` (camera to world), so `translation` is the
//! projection center in world coordinates and `rotation` maps camera-frame
//! directions into the world frame.

use nalgebra::{UnitQuaternion, Vector3};

/// Rigid body transformation. Transforms points as: p' = R * p + t
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pose of a downward looking (nadir) camera centered at `center`.
    ///
    /// Camera x points east, camera y points south, optical axis points down.
    pub fn nadir(center: Vector3<f64>) -> Self {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        Self {
            rotation,
            translation: center,
        }
    }

    /// Inverse transformation: [R^T | -R^T * t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Transform a single point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Rotate a direction vector (no translation).
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_transform() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(SE3::identity().transform_point(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_undoes_transform() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.7),
            translation: Vector3::new(3.0, -1.0, 12.0),
        };
        let p = Vector3::new(-4.0, 0.5, 2.0);
        let back = pose.inverse().transform_point(&pose.transform_point(&p));

        assert_relative_eq!(back, p, epsilon = 1e-10);
    }

    #[test]
    fn test_nadir_looks_down() {
        let pose = SE3::nadir(Vector3::new(0.0, 0.0, 100.0));
        let optical_axis = pose.transform_vector(&Vector3::z());

        assert_relative_eq!(optical_axis, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
    }
}
