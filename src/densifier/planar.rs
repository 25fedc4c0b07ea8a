//! Depth from intersecting viewing rays with the reference plane.

use nalgebra::DMatrix;
use tracing::{debug, warn};

use crate::frame::{Depthmap, Frame, INVALID_DEPTH};
use crate::geometry::Plane;

use super::{Densifier, DensifierSettings, log_settings, prepare_window};
use super::settings::BACKEND_PLANE;

/// Assumes the scene is the reference plane itself.
///
/// Useful over flat terrain and as a fallback backend: every pixel whose
/// viewing ray hits the plane in front of the camera gets a depth.
pub struct PlanarDensifier {
    settings: DensifierSettings,
}

impl PlanarDensifier {
    pub fn new(settings: DensifierSettings) -> Self {
        Self { settings }
    }
}

impl Densifier for PlanarDensifier {
    fn densify(&mut self, frames: &[Frame], reference: usize, plane: &Plane) -> Option<Depthmap> {
        let camera = prepare_window(frames, reference, &self.settings, BACKEND_PLANE)?;
        let center = camera.center();
        let rows = camera.height() as usize;
        let cols = camera.width() as usize;

        let data = DMatrix::from_fn(rows, cols, |r, c| {
            let ray = camera.pixel_ray(c as f64, r as f64);
            plane
                .intersect_ray(&center, &ray)
                .map(|hit| camera.world_to_camera(&hit).z as f32)
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(INVALID_DEPTH)
        });

        let depthmap = Depthmap::new(data, camera).ok()?;
        if depthmap.valid_count() == 0 {
            warn!(
                "Reference plane not visible from frame {}",
                frames[reference].id
            );
            return None;
        }
        debug!(
            "Planar depth map for {}: {:.1}% coverage",
            frames[reference].id,
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
        BACKEND_PLANE
    }

    fn print_settings_to_log(&self) {
        log_settings(BACKEND_PLANE, &self.settings);
    }
}
