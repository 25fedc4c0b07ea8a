//! Dense per-pixel depth with the camera it was computed for.

use anyhow::{Result, bail};
use nalgebra::{DMatrix, Vector3};

use crate::frame::camera::PinholeCamera;

/// Sentinel stored in cells without a valid depth estimate.
pub const INVALID_DEPTH: f32 = -1.0;

/// Whether a raw depth value represents a measurement.
#[inline]
pub fn is_valid_depth(d: f32) -> bool {
    d.is_finite() && d > 0.0
}

/// Depth along the optical axis (camera z), one value per pixel of `camera`.
///
/// `data` has `camera.height()` rows and `camera.width()` columns. The camera
/// may be a resized version of the frame camera.
#[derive(Debug, Clone)]
pub struct Depthmap {
    data: DMatrix<f32>,
    camera: PinholeCamera,
}

impl Depthmap {
    pub fn new(data: DMatrix<f32>, camera: PinholeCamera) -> Result<Self> {
        if data.nrows() != camera.height() as usize || data.ncols() != camera.width() as usize {
            bail!(
                "Depth map size {}x{} does not match camera {}x{}",
                data.ncols(),
                data.nrows(),
                camera.width(),
                camera.height()
            );
        }
        Ok(Self { data, camera })
    }

    pub fn data(&self) -> &DMatrix<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DMatrix<f32> {
        &mut self.data
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&d| is_valid_depth(d)).count()
    }

    /// Fraction of valid cells in [0, 1].
    pub fn coverage(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.valid_count() as f64 / self.data.len() as f64
    }

    pub fn median_depth(&self) -> Option<f32> {
        let mut values: Vec<f32> = self.data.iter().copied().filter(|&d| is_valid_depth(d)).collect();
        if values.is_empty() {
            return None;
        }
        let mid = values.len() / 2;
        let (_, median, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
        Some(*median)
    }

    /// World point of a cell, if its depth is valid.
    pub fn world_point(&self, row: usize, col: usize) -> Option<Vector3<f64>> {
        let d = *self.data.get((row, col))?;
        if !is_valid_depth(d) {
            return None;
        }
        Some(self.camera.unproject(col as f64, row as f64, d as f64))
    }

    /// All valid cells as world points.
    pub fn to_world_points(&self) -> Vec<Vector3<f64>> {
        let mut points = Vec::with_capacity(self.valid_count());
        for c in 0..self.cols() {
            for r in 0..self.rows() {
                if let Some(p) = self.world_point(r, c) {
                    points.push(p);
                }
            }
        }
        points
    }

    /// Render this depth map into another camera.
    ///
    /// Every valid cell is lifted to 3D and projected into `target`, keeping the
    /// nearest depth per target pixel. Unobserved target pixels are invalid.
    pub fn reproject_to(&self, target: &PinholeCamera) -> DMatrix<f32> {
        let rows = target.height() as usize;
        let cols = target.width() as usize;
        let mut out = DMatrix::from_element(rows, cols, INVALID_DEPTH);

        for c in 0..self.cols() {
            for r in 0..self.rows() {
                let Some(p_world) = self.world_point(r, c) else {
                    continue;
                };
                let Some((px, depth)) = target.project_with_depth(&p_world) else {
                    continue;
                };
                let (u, v) = (px.x.round(), px.y.round());
                if u < 0.0 || v < 0.0 || u >= cols as f64 || v >= rows as f64 {
                    continue;
                }
                let cell = &mut out[(v as usize, u as usize)];
                let depth = depth as f32;
                if !is_valid_depth(*cell) || depth < *cell {
                    *cell = depth;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use approx::assert_relative_eq;

    fn nadir_camera(x: f64, altitude: f64) -> PinholeCamera {
        PinholeCamera::new(50.0, 50.0, 20.0, 15.0, 40, 30, SE3::nadir(Vector3::new(x, 0.0, altitude)))
            .unwrap()
    }

    #[test]
    fn test_size_must_match_camera() {
        let cam = nadir_camera(0.0, 10.0);
        assert!(Depthmap::new(DMatrix::zeros(30, 40), cam.clone()).is_ok());
        assert!(Depthmap::new(DMatrix::zeros(40, 30), cam).is_err());
    }

    #[test]
    fn test_coverage_and_median() {
        let cam = nadir_camera(0.0, 10.0);
        let mut data = DMatrix::from_element(30, 40, INVALID_DEPTH);
        for c in 0..40 {
            data[(0, c)] = 10.0;
            data[(1, c)] = 12.0;
            data[(2, c)] = 14.0;
        }
        let depth = Depthmap::new(data, cam).unwrap();

        assert_eq!(depth.valid_count(), 120);
        assert_relative_eq!(depth.coverage(), 0.1);
        assert_eq!(depth.median_depth(), Some(12.0));
    }

    #[test]
    fn test_reproject_flat_ground_between_cameras() {
        let altitude = 10.0;
        let cam_a = nadir_camera(0.0, altitude);
        let cam_b = nadir_camera(1.0, altitude);
        let data = DMatrix::from_element(30, 40, altitude as f32);
        let depth_a = Depthmap::new(data, cam_a).unwrap();

        let in_b = depth_a.reproject_to(&cam_b);
        // Camera B sees the same ground at the same altitude.
        assert_relative_eq!(in_b[(15, 10)], 10.0, epsilon = 1e-4);
        // Its rightmost columns see ground that camera A never observed.
        assert!(!is_valid_depth(in_b[(15, 39)]));
    }
}
