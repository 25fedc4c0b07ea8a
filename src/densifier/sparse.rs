//! Depth by interpolating the reference frame's sparse points.

use nalgebra::{DMatrix, Point2};
use tracing::{debug, info, warn};

use crate::frame::{Depthmap, Frame, INVALID_DEPTH};
use crate::geometry::Plane;

use super::{Densifier, DensifierSettings, log_settings, prepare_window};
use super::settings::BACKEND_SPARSE;

/// Fewest projected points an interpolation is attempted with.
const MIN_SPARSE_POINTS: usize = 3;

/// Inverse distance weighted interpolation of projected sparse depths.
///
/// Pixels with no sparse point within `sparse_radius_px` stay invalid.
pub struct SparseDensifier {
    settings: DensifierSettings,
}

impl SparseDensifier {
    pub fn new(settings: DensifierSettings) -> Self {
        Self { settings }
    }

    fn interpolate(&self, samples: &[(Point2<f64>, f64)], u: f64, v: f64) -> f32 {
        let radius_sq = self.settings.sparse_radius_px * self.settings.sparse_radius_px;
        let half_power = self.settings.sparse_power * 0.5;
        let mut weight_sum = 0.0;
        let mut value_sum = 0.0;
        for (px, depth) in samples {
            let dist_sq = (px.x - u).powi(2) + (px.y - v).powi(2);
            if dist_sq > radius_sq {
                continue;
            }
            if dist_sq < 1e-12 {
                return *depth as f32;
            }
            let w = 1.0 / dist_sq.powf(half_power);
            weight_sum += w;
            value_sum += w * depth;
        }
        if weight_sum > 0.0 {
            (value_sum / weight_sum) as f32
        } else {
            INVALID_DEPTH
        }
    }
}

impl Densifier for SparseDensifier {
    fn densify(&mut self, frames: &[Frame], reference: usize, _plane: &Plane) -> Option<Depthmap> {
        let camera = prepare_window(frames, reference, &self.settings, BACKEND_SPARSE)?;
        let ref_frame = &frames[reference];

        let samples: Vec<(Point2<f64>, f64)> = ref_frame
            .sparse_points_in(&camera)
            .into_iter()
            .filter(|(px, _)| camera.contains(px))
            .collect();
        if samples.len() < MIN_SPARSE_POINTS {
            warn!(
                "Frame {}: only {} sparse points visible, cannot interpolate",
                ref_frame.id,
                samples.len()
            );
            return None;
        }

        let rows = camera.height() as usize;
        let cols = camera.width() as usize;
        let data = DMatrix::from_fn(rows, cols, |r, c| self.interpolate(&samples, c as f64, r as f64));

        let depthmap = Depthmap::new(data, camera).ok()?;
        debug!(
            "Sparse depth map for {} from {} points: {:.1}% coverage",
            ref_frame.id,
            samples.len(),
            depthmap.coverage() * 100.0
        );
        Some(depthmap)
    }

    fn n_input_frames(&self) -> usize {
        self.settings.n_frames
    }

    fn resize_factor(&self) -> f64 {
        self.settings.resize_factor
    }

    fn name(&self) -> &'static str {
        BACKEND_SPARSE
    }

    fn print_settings_to_log(&self) {
        log_settings(BACKEND_SPARSE, &self.settings);
        info!("  sparse_radius_px: {}", self.settings.sparse_radius_px);
        info!("  sparse_power: {}", self.settings.sparse_power);
    }
}
