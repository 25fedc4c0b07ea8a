//! Backprojection of a georeferenced surface into a camera image.
//!
//! Every grid cell is lifted to a world point (cell position plus elevation),
//! projected through the camera and colored by bilinear sampling of the
//! image. Each cell is independent, so rows are processed in parallel.
//!
//! Occlusions are not handled: a cell hidden behind higher terrain is still
//! colored by whatever the camera sees along its ray.

use anyhow::{Context, Result, bail};
use nalgebra::{DMatrix, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::frame::{Frame, PinholeCamera, RgbaImage, SurfaceAssumption, bilinear_sample_rgba};
use crate::grid::{CvGridMap, LayerData, Roi};

/// Vectors shorter than this have no defined direction.
const MIN_VIEW_DISTANCE: f64 = 1e-9;

pub const LAYER_COLOR: &str = "color_rgb";
pub const LAYER_VALID: &str = "valid";
pub const LAYER_ELEVATION: &str = "elevation";
pub const LAYER_ELEVATION_ANGLE: &str = "elevation_angle";
pub const LAYER_ELEVATED: &str = "elevated";
pub const LAYER_NUM_OBSERVATIONS: &str = "num_observations";

/// Result of backprojecting a single cell.
#[derive(Clone, Copy)]
struct CellSample {
    color: [u8; 4],
    valid: bool,
    elevation_angle: f32,
}

impl CellSample {
    const INVALID: CellSample = CellSample {
        color: [0, 0, 0, 0],
        valid: false,
        elevation_angle: f32::NAN,
    };
}

/// Angle in degrees between the horizontal plane and the line from `p` to `t`.
///
/// 90 means `t` is straight above `p`. `None` if the points coincide.
pub fn compute_elevation_angle(t: &Vector3<f64>, p: &Vector3<f64>) -> Option<f64> {
    let v = t - p;
    let length = v.norm();
    if !(length > MIN_VIEW_DISTANCE) {
        return None;
    }
    let cos = (v.z / length).clamp(-1.0, 1.0);
    Some(90.0 - cos.acos().to_degrees())
}

/// Orthophoto of a frame over its attached surface.
///
/// The surface must carry `elevation` and `valid` layers. Elevations are used
/// only for [`SurfaceAssumption::Elevation`], otherwise the ground is z = 0.
/// The output additionally carries the surface elevation.
pub fn rectify(frame: &Frame) -> Result<CvGridMap> {
    let surface = frame
        .surface
        .as_ref()
        .with_context(|| format!("Frame {} has no surface to rectify", frame.id))?;
    let elevation = surface
        .float(LAYER_ELEVATION)
        .with_context(|| format!("Surface of frame {} lacks an '{}' layer", frame.id, LAYER_ELEVATION))?;
    let valid = surface
        .mask(LAYER_VALID)
        .with_context(|| format!("Surface of frame {} lacks a '{}' layer", frame.id, LAYER_VALID))?;
    let is_elevated = frame.surface_assumption == SurfaceAssumption::Elevation;

    let mut ortho = backproject_from_grid(
        &frame.image,
        &frame.camera,
        elevation,
        valid,
        &surface.roi(),
        surface.resolution(),
        is_elevated,
    )?;
    ortho.add(LAYER_ELEVATION, LayerData::Float(elevation.clone()))?;
    Ok(ortho)
}

/// Color every cell of a surface grid from a camera image.
///
/// Cell `(r, c)` is the world point `(roi.x + c * gsd, roi.y + r * gsd, z)`
/// with `z = surface(r, c)` if `is_elevated`, else 0. Cells that are masked
/// out, behind the camera or outside the image are invalid.
///
/// Output layers: `color_rgb`, `valid`, `elevation_angle` (degrees, NaN where
/// invalid), `elevated`, `num_observations`.
pub fn backproject_from_grid(
    img: &RgbaImage,
    cam: &PinholeCamera,
    surface: &DMatrix<f32>,
    valid_surface: &DMatrix<bool>,
    roi: &Roi,
    gsd: f64,
    is_elevated: bool,
) -> Result<CvGridMap> {
    if surface.shape() != valid_surface.shape() {
        bail!(
            "Surface {:?} and validity mask {:?} differ in size",
            surface.shape(),
            valid_surface.shape()
        );
    }
    if img.width() != cam.width() || img.height() != cam.height() {
        bail!(
            "Image {}x{} does not match camera {}x{}",
            img.width(),
            img.height(),
            cam.width(),
            cam.height()
        );
    }
    let (rows, cols) = surface.shape();
    let mut grid = CvGridMap::from_origin(roi.x, roi.y, rows, cols, gsd)?;
    let center = cam.center();

    let sample_cell = |r: usize, c: usize| -> CellSample {
        if !valid_surface[(r, c)] {
            return CellSample::INVALID;
        }
        let z = if is_elevated { surface[(r, c)] as f64 } else { 0.0 };
        if !z.is_finite() {
            return CellSample::INVALID;
        }
        let p = Vector3::new(roi.x + c as f64 * gsd, roi.y + r as f64 * gsd, z);
        let Some(px) = cam.project(&p) else {
            return CellSample::INVALID;
        };
        if !cam.contains(&px) {
            return CellSample::INVALID;
        }
        let Some(color) = bilinear_sample_rgba(img, px.x, px.y) else {
            return CellSample::INVALID;
        };
        let elevation_angle = compute_elevation_angle(&center, &p)
            .map(|a| a as f32)
            .unwrap_or(f32::NAN);
        CellSample {
            color,
            valid: true,
            elevation_angle,
        }
    };

    let samples: Vec<Vec<CellSample>> = (0..rows)
        .into_par_iter()
        .map(|r| (0..cols).map(|c| sample_cell(r, c)).collect())
        .collect();

    let color = DMatrix::from_fn(rows, cols, |r, c| samples[r][c].color);
    let valid = DMatrix::from_fn(rows, cols, |r, c| samples[r][c].valid);
    let elevation_angle = DMatrix::from_fn(rows, cols, |r, c| samples[r][c].elevation_angle);
    let elevated = valid.map(|v| v && is_elevated);
    let num_observations = valid.map(u16::from);

    debug!(
        "Backprojected {}x{} grid: {} valid cells",
        rows,
        cols,
        valid.iter().filter(|&&v| v).count()
    );

    grid.add(LAYER_COLOR, LayerData::Color(color))?;
    grid.add(LAYER_VALID, LayerData::Mask(valid))?;
    grid.add(LAYER_ELEVATION_ANGLE, LayerData::Float(elevation_angle))?;
    grid.add(LAYER_ELEVATED, LayerData::Mask(elevated))?;
    grid.add(LAYER_NUM_OBSERVATIONS, LayerData::Count(num_observations))?;
    Ok(grid)
}
