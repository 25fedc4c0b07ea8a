//! Depth map post-processing: range clipping, bilateral smoothing, masks and normals.
//!
//! All functions here are pure: they take matrices by reference and return
//! fresh results.

use nalgebra::{DMatrix, Point2, Vector3};
use serde::Deserialize;

use crate::frame::{Depthmap, INVALID_DEPTH, is_valid_depth};
use crate::geometry::{convex_hull, point_in_convex_polygon};

/// Closed interval of accepted depths, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
}

impl DepthRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, d: f32) -> bool {
        d.is_finite() && d >= self.min && d <= self.max
    }
}

/// Parameters of the edge preserving depth smoothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BilateralSettings {
    /// Window diameter in pixels.
    pub diameter: usize,
    /// Range kernel sigma, in depth units.
    pub sigma_color: f32,
    /// Spatial kernel sigma, in pixels.
    pub sigma_space: f32,
}

impl Default for BilateralSettings {
    fn default() -> Self {
        Self {
            diameter: 5,
            sigma_color: 25.0,
            sigma_space: 25.0,
        }
    }
}

/// Keep values inside `range`, replace everything else with [`INVALID_DEPTH`].
pub fn force_in_range(depth: &DMatrix<f32>, range: DepthRange) -> DMatrix<f32> {
    depth.map(|d| if range.contains(d) { d } else { INVALID_DEPTH })
}

/// Bilateral filter over valid cells only.
///
/// Invalid cells neither contribute to nor receive a filtered value.
pub fn bilateral_filter(depth: &DMatrix<f32>, settings: &BilateralSettings) -> DMatrix<f32> {
    let (rows, cols) = depth.shape();
    let radius = (settings.diameter / 2) as isize;
    let space_denom = 2.0 * settings.sigma_space * settings.sigma_space;
    let color_denom = 2.0 * settings.sigma_color * settings.sigma_color;

    DMatrix::from_fn(rows, cols, |r, c| {
        let center = depth[(r, c)];
        if !is_valid_depth(center) {
            return center;
        }
        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                let rr = r as isize + dr;
                let cc = c as isize + dc;
                if rr < 0 || cc < 0 || rr >= rows as isize || cc >= cols as isize {
                    continue;
                }
                let d = depth[(rr as usize, cc as usize)];
                if !is_valid_depth(d) {
                    continue;
                }
                let spatial = ((dr * dr + dc * dc) as f32) / space_denom;
                let range = (d - center) * (d - center) / color_denom;
                let w = (-(spatial + range)).exp();
                weight_sum += w;
                value_sum += w * d;
            }
        }
        if weight_sum > 0.0 {
            value_sum / weight_sum
        } else {
            center
        }
    })
}

/// Cells whose center lies inside the convex hull of `points` (pixel coordinates).
///
/// Fewer than three non-collinear points give an empty mask.
pub fn compute_sparse_mask(points: &[Point2<f64>], rows: usize, cols: usize) -> DMatrix<bool> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return DMatrix::from_element(rows, cols, false);
    }
    DMatrix::from_fn(rows, cols, |r, c| {
        point_in_convex_polygon(&hull, &Point2::new(c as f64, r as f64))
    })
}

/// Validity mask of a depth map.
///
/// A cell is valid iff its depth is finite and inside `range`; with
/// `sparse_points` it must also lie inside their convex hull.
pub fn compute_depth_map_mask(
    depth: &DMatrix<f32>,
    range: DepthRange,
    sparse_points: Option<&[Point2<f64>]>,
) -> DMatrix<bool> {
    let in_range = depth.map(|d| range.contains(d));
    match sparse_points {
        Some(points) => {
            let hull_mask = compute_sparse_mask(points, depth.nrows(), depth.ncols());
            in_range.zip_map(&hull_mask, |a, b| a && b)
        }
        None => in_range,
    }
}

/// Per-cell surface normals in world coordinates, oriented toward the camera.
///
/// Cells without a valid depth or without valid neighbors get a zero vector.
pub fn compute_normals(depthmap: &Depthmap) -> DMatrix<Vector3<f32>> {
    let rows = depthmap.rows();
    let cols = depthmap.cols();
    let center = depthmap.camera().center();

    let neighbor = |r: usize, c: usize, forward: bool, along_cols: bool| {
        let (nr, nc) = match (forward, along_cols) {
            (true, true) if c + 1 < cols => (r, c + 1),
            (false, true) if c > 0 => (r, c - 1),
            (true, false) if r + 1 < rows => (r + 1, c),
            (false, false) if r > 0 => (r - 1, c),
            _ => return None,
        };
        depthmap.world_point(nr, nc)
    };

    DMatrix::from_fn(rows, cols, |r, c| {
        let Some(p) = depthmap.world_point(r, c) else {
            return Vector3::zeros();
        };
        let du = match (neighbor(r, c, true, true), neighbor(r, c, false, true)) {
            (Some(next), _) => next - p,
            (None, Some(prev)) => p - prev,
            _ => return Vector3::zeros(),
        };
        let dv = match (neighbor(r, c, true, false), neighbor(r, c, false, false)) {
            (Some(next), _) => next - p,
            (None, Some(prev)) => p - prev,
            _ => return Vector3::zeros(),
        };
        let mut n = du.cross(&dv);
        let norm = n.norm();
        if !(norm > 1e-12) {
            return Vector3::zeros();
        }
        n /= norm;
        if n.dot(&(center - p)) < 0.0 {
            n = -n;
        }
        n.cast::<f32>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::nadir_camera;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_depth(rows: usize, cols: usize, seed: u64) -> DMatrix<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        DMatrix::from_fn(rows, cols, |_, _| {
            if rng.gen_bool(0.1) {
                INVALID_DEPTH
            } else {
                rng.gen_range(0.0..100.0)
            }
        })
    }

    #[test]
    fn test_force_in_range_preserves_in_range_values() {
        let depth = DMatrix::from_row_slice(1, 6, &[5.0, 10.0, 15.0, 20.0, f32::NAN, INVALID_DEPTH]);
        let range = DepthRange::new(10.0, 15.0);

        let out = force_in_range(&depth, range);
        assert_eq!(out[(0, 0)], INVALID_DEPTH);
        assert_eq!(out[(0, 1)], 10.0);
        assert_eq!(out[(0, 2)], 15.0);
        assert_eq!(out[(0, 3)], INVALID_DEPTH);
        assert_eq!(out[(0, 4)], INVALID_DEPTH);
        assert_eq!(out[(0, 5)], INVALID_DEPTH);
    }

    #[test]
    fn test_force_in_range_is_idempotent() {
        let depth = random_depth(20, 30, 7);
        let range = DepthRange::new(25.0, 75.0);

        let once = force_in_range(&depth, range);
        let twice = force_in_range(&once, range);
        assert_eq!(once, twice);
        for (d, o) in depth.iter().zip(once.iter()) {
            if range.contains(*d) {
                assert_eq!(d, o);
            } else {
                assert_eq!(*o, INVALID_DEPTH);
            }
        }
    }

    #[test]
    fn test_bilateral_keeps_invalid_cells() {
        let mut depth = DMatrix::from_element(5, 5, 10.0f32);
        depth[(2, 2)] = INVALID_DEPTH;
        depth[(0, 0)] = 12.0;

        let out = bilateral_filter(&depth, &BilateralSettings::default());
        assert_eq!(out[(2, 2)], INVALID_DEPTH);
        // Constant neighborhood stays constant.
        assert_relative_eq!(out[(4, 4)], 10.0, epsilon = 1e-5);
        // Outlier is pulled toward its neighbors.
        assert!(out[(0, 0)] < 12.0 && out[(0, 0)] > 10.0);
    }

    #[test]
    fn test_depth_map_mask_is_deterministic() {
        let depth = random_depth(16, 16, 3);
        let range = DepthRange::new(10.0, 90.0);
        let points = vec![Point2::new(1.0, 1.0), Point2::new(14.0, 2.0), Point2::new(8.0, 14.0)];

        let a = compute_depth_map_mask(&depth, range, Some(&points));
        let b = compute_depth_map_mask(&depth, range, Some(&points));
        assert_eq!(a, b);
    }

    #[test]
    fn test_triangular_sparse_hull_masks_outside_cells() {
        let depth = DMatrix::from_element(20, 20, 50.0f32);
        let range = DepthRange::new(1.0, 100.0);
        let triangle = vec![Point2::new(2.0, 2.0), Point2::new(17.0, 2.0), Point2::new(2.0, 17.0)];

        let without = compute_depth_map_mask(&depth, range, None);
        assert!(without.iter().all(|&v| v));

        let mask = compute_depth_map_mask(&depth, range, Some(&triangle));
        for r in 0..20 {
            for c in 0..20 {
                let (x, y) = (c as f64, r as f64);
                let strictly_outside = x < 2.0 || y < 2.0 || x + y > 19.0;
                let strictly_inside = x > 2.0 && y > 2.0 && x + y < 19.0;
                if strictly_outside {
                    assert!(!mask[(r, c)], "cell ({}, {}) should be masked", r, c);
                }
                if strictly_inside {
                    assert!(mask[(r, c)], "cell ({}, {}) should be kept", r, c);
                }
            }
        }
    }

    #[test]
    fn test_sparse_mask_needs_three_points() {
        let mask = compute_sparse_mask(&[Point2::new(0.0, 0.0), Point2::new(5.0, 5.0)], 8, 8);
        assert!(mask.iter().all(|&v| !v));
    }

    #[test]
    fn test_normals_of_flat_ground_point_up() {
        let camera = nadir_camera(0.0, 0.0, 20.0);
        let data = DMatrix::from_element(camera.height() as usize, camera.width() as usize, 20.0f32);
        let depthmap = Depthmap::new(data, camera).unwrap();

        let normals = compute_normals(&depthmap);
        let n = normals[(10, 10)];
        assert_relative_eq!(n.z, 1.0, epsilon = 1e-4);
        // Last row and column fall back to backward differences.
        let corner = normals[(depthmap.rows() - 1, depthmap.cols() - 1)];
        assert_relative_eq!(corner.z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_normals_of_invalid_cells_are_zero() {
        let camera = nadir_camera(0.0, 0.0, 20.0);
        let mut data = DMatrix::from_element(camera.height() as usize, camera.width() as usize, 20.0f32);
        data[(5, 5)] = INVALID_DEPTH;
        let depthmap = Depthmap::new(data, camera).unwrap();

        let normals = compute_normals(&depthmap);
        assert_eq!(normals[(5, 5)], Vector3::zeros());
    }
}
