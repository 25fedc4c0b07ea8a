//! Pinhole camera model with pose.

use anyhow::{Result, bail};
use nalgebra::{Point2, Unit, Vector3};

use crate::geometry::SE3;

/// Points closer than this to the image plane (camera z, meters) are treated
/// as behind the camera.
pub const MIN_PROJECTION_DEPTH: f64 = 1e-6;

/// Undistorted pinhole camera with its pose `T_wc`.
///
/// Pixel coordinates follow the image convention: `u` along columns (right),
/// `v` along rows (down), pixel centers at integer coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
    pose: SE3,
}

impl PinholeCamera {
    /// Create a camera, rejecting malformed intrinsics.
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        width: u32,
        height: u32,
        pose: SE3,
    ) -> Result<Self> {
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            bail!("Invalid focal length fx={}, fy={}", fx, fy);
        }
        if !(cx.is_finite() && cy.is_finite()) {
            bail!("Invalid principal point cx={}, cy={}", cx, cy);
        }
        if width == 0 || height == 0 {
            bail!("Invalid image size {}x{}", width, height);
        }
        let t = &pose.translation;
        if !(t.x.is_finite() && t.y.is_finite() && t.z.is_finite()) {
            bail!("Invalid camera position {:?}", t);
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
            pose,
        })
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Camera to world transform.
    pub fn pose(&self) -> &SE3 {
        &self.pose
    }

    /// Projection center in world coordinates.
    pub fn center(&self) -> Vector3<f64> {
        self.pose.translation
    }

    /// Camera for an image scaled by `factor` (e.g. 0.5 halves the resolution).
    pub fn resized(&self, factor: f64) -> Result<Self> {
        if !(factor.is_finite() && factor > 0.0) {
            bail!("Invalid resize factor {}", factor);
        }
        let width = (self.width as f64 * factor).round() as u32;
        let height = (self.height as f64 * factor).round() as u32;
        Self::new(
            self.fx * factor,
            self.fy * factor,
            self.cx * factor,
            self.cy * factor,
            width,
            height,
            self.pose.clone(),
        )
    }

    /// Transform a world point into the camera frame.
    pub fn world_to_camera(&self, p_world: &Vector3<f64>) -> Vector3<f64> {
        self.pose.inverse().transform_point(p_world)
    }

    /// Project a camera-frame point. `None` if it is behind the camera.
    pub fn project_camera_point(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if !(p_cam.z > MIN_PROJECTION_DEPTH) {
            return None;
        }
        let u = self.fx * p_cam.x / p_cam.z + self.cx;
        let v = self.fy * p_cam.y / p_cam.z + self.cy;
        if u.is_finite() && v.is_finite() {
            Some(Point2::new(u, v))
        } else {
            None
        }
    }

    /// Project a world point to pixel coordinates. `None` if behind the camera.
    ///
    /// The pixel may lie outside the image; see [`PinholeCamera::contains`].
    pub fn project(&self, p_world: &Vector3<f64>) -> Option<Point2<f64>> {
        self.project_camera_point(&self.world_to_camera(p_world))
    }

    /// Project and also return the depth along the optical axis.
    pub fn project_with_depth(&self, p_world: &Vector3<f64>) -> Option<(Point2<f64>, f64)> {
        let p_cam = self.world_to_camera(p_world);
        self.project_camera_point(&p_cam).map(|px| (px, p_cam.z))
    }

    /// Viewing ray through pixel (u, v), expressed in the world frame.
    pub fn pixel_ray(&self, u: f64, v: f64) -> Unit<Vector3<f64>> {
        let dir_cam = Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0);
        Unit::new_normalize(self.pose.transform_vector(&dir_cam))
    }

    /// World point at pixel (u, v) with depth `depth` along the optical axis.
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        let p_cam = Vector3::new(
            (u - self.cx) / self.fx * depth,
            (v - self.cy) / self.fy * depth,
            depth,
        );
        self.pose.transform_point(&p_cam)
    }

    /// Whether a pixel position lies inside the image area.
    pub fn contains(&self, px: &Point2<f64>) -> bool {
        px.x >= 0.0
            && px.y >= 0.0
            && px.x <= (self.width - 1) as f64
            && px.y <= (self.height - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_at(center: Vector3<f64>) -> PinholeCamera {
        let pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: center,
        };
        PinholeCamera::new(500.0, 500.0, 320.0, 240.0, 640, 480, pose).unwrap()
    }

    #[test]
    fn test_malformed_intrinsics_rejected() {
        assert!(PinholeCamera::new(0.0, 500.0, 320.0, 240.0, 640, 480, SE3::identity()).is_err());
        assert!(PinholeCamera::new(500.0, f64::NAN, 320.0, 240.0, 640, 480, SE3::identity()).is_err());
        assert!(PinholeCamera::new(500.0, 500.0, 320.0, 240.0, 0, 480, SE3::identity()).is_err());
    }

    #[test]
    fn test_pinhole_equation() {
        // Identity rotation, camera 100 m "below" the z = 0 plane looking along +z.
        let cam = camera_at(Vector3::new(10.0, 20.0, -100.0));
        let (dx, dy) = (7.5, -3.25);
        let px = cam.project(&Vector3::new(10.0 + dx, 20.0 + dy, 0.0)).unwrap();

        assert_relative_eq!(px.x, 500.0 * dx / 100.0 + 320.0, epsilon = 1e-9);
        assert_relative_eq!(px.y, 500.0 * dy / 100.0 + 240.0, epsilon = 1e-9);
    }

    #[test]
    fn test_behind_camera_is_none() {
        let cam = camera_at(Vector3::zeros());
        assert!(cam.project(&Vector3::new(0.0, 0.0, -5.0)).is_none());
        assert!(cam.project(&Vector3::new(1.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_unproject_roundtrip_depth() {
        let cam = PinholeCamera::new(500.0, 500.0, 320.0, 240.0, 640, 480, SE3::nadir(Vector3::new(0.0, 0.0, 80.0)))
            .unwrap();
        let p = cam.unproject(100.0, 50.0, 80.0);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-9);

        let (px, depth) = cam.project_with_depth(&p).unwrap();
        assert_relative_eq!(px.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(px.y, 50.0, epsilon = 1e-9);
        assert_relative_eq!(depth, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_resized_scales_intrinsics() {
        let cam = camera_at(Vector3::zeros()).resized(0.5).unwrap();
        assert_eq!((cam.width(), cam.height()), (320, 240));
        assert_relative_eq!(cam.fx(), 250.0);
        assert_relative_eq!(cam.cx(), 160.0);
    }
}
