//! Elevation surfaces from dense point clouds.

use anyhow::{Result, bail};
use nalgebra::{DMatrix, Vector3};

use crate::grid::{CvGridMap, LayerData, Roi};

use super::rectification::{LAYER_ELEVATION, LAYER_VALID};

/// Rasterize world points into a grid with `elevation` and `valid` layers.
///
/// The grid spans the bounding box of the points. Each cell keeps the highest
/// point falling into it; cells without points are invalid with NaN elevation.
pub fn surface_from_points(points: &[Vector3<f64>], gsd: f64) -> Result<CvGridMap> {
    let finite: Vec<&Vector3<f64>> = points
        .iter()
        .filter(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite())
        .collect();
    if finite.is_empty() {
        bail!("Cannot build a surface without points");
    }

    let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
    let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
    for p in &finite {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let mut grid = CvGridMap::new(Roi::new(min_x, min_y, max_x - min_x, max_y - min_y), gsd)?;
    let (rows, cols) = grid.size();

    let mut elevation = DMatrix::from_element(rows, cols, f32::NAN);
    let mut valid = DMatrix::from_element(rows, cols, false);
    for p in finite {
        let Some(cell) = grid.index_of(p.x, p.y) else {
            continue;
        };
        let z = p.z as f32;
        if !valid[cell] || z > elevation[cell] {
            elevation[cell] = z;
            valid[cell] = true;
        }
    }

    grid.add(LAYER_ELEVATION, LayerData::Float(elevation))?;
    grid.add(LAYER_VALID, LayerData::Mask(valid))?;
    Ok(grid)
}
