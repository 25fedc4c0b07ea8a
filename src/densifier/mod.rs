//! Dense depth reconstruction backends.
//!
//! A [`Densifier`] turns a window of posed frames into a depth map for one
//! reference frame of the window. Backends are selected by name through
//! [`create_densifier`]; failures are reported as `None` and are never fatal
//! to the calling stage.

mod planar;
mod settings;
mod sparse;

pub use planar::PlanarDensifier;
pub use settings::{BACKEND_PLANE, BACKEND_SPARSE, DensifierSettings};
pub use sparse::SparseDensifier;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::frame::{Depthmap, Frame, PinholeCamera};
use crate::geometry::{Plane, compute_baseline};

/// Pluggable dense reconstruction.
pub trait Densifier: Send {
    /// Reconstruct a depth map for `frames[reference]`.
    ///
    /// The depth map belongs to the reference camera scaled by
    /// [`Densifier::resize_factor`]. Returns `None` if the window is too small,
    /// the baseline is insufficient or matching failed.
    fn densify(&mut self, frames: &[Frame], reference: usize, plane: &Plane) -> Option<Depthmap>;

    /// Number of frames one reconstruction consumes.
    fn n_input_frames(&self) -> usize;

    fn resize_factor(&self) -> f64;

    fn name(&self) -> &'static str;

    fn print_settings_to_log(&self);
}

/// Build the backend named in `settings`.
pub fn create_densifier(settings: &DensifierSettings) -> Result<Box<dyn Densifier>> {
    settings.validate()?;
    match settings.backend.as_str() {
        BACKEND_PLANE => Ok(Box::new(PlanarDensifier::new(settings.clone()))),
        BACKEND_SPARSE => Ok(Box::new(SparseDensifier::new(settings.clone()))),
        other => bail!(
            "Unknown densifier backend '{}' (expected '{}' or '{}')",
            other,
            BACKEND_PLANE,
            BACKEND_SPARSE
        ),
    }
}

/// Log the baselines of a window relative to its reference frame.
///
/// Returns false if any frame is closer than `min_baseline` to the reference.
pub fn check_baselines(frames: &[Frame], reference: usize, min_baseline: f64) -> bool {
    let Some(ref_frame) = frames.get(reference) else {
        return false;
    };
    let mut ok = true;
    for (i, frame) in frames.iter().enumerate() {
        if i == reference {
            continue;
        }
        let baseline = compute_baseline(ref_frame.camera.pose(), frame.camera.pose());
        debug!(
            "Baseline {} -> {}: {:.3} m",
            ref_frame.id, frame.id, baseline
        );
        if baseline < min_baseline {
            ok = false;
        }
    }
    if !ok {
        warn!(
            "Insufficient baseline for reference {} (min {:.3} m)",
            ref_frame.id, min_baseline
        );
    }
    ok
}

/// Checks shared by all backends. Returns the depth map camera on success.
fn prepare_window(
    frames: &[Frame],
    reference: usize,
    settings: &DensifierSettings,
    name: &str,
) -> Option<PinholeCamera> {
    if frames.len() < settings.n_frames {
        warn!(
            "Densifier '{}' needs {} frames, got {}",
            name,
            settings.n_frames,
            frames.len()
        );
        return None;
    }
    if reference >= frames.len() {
        warn!("Densifier '{}': reference index {} out of range", name, reference);
        return None;
    }
    if !check_baselines(frames, reference, settings.min_baseline) {
        return None;
    }
    match frames[reference].camera.resized(settings.resize_factor) {
        Ok(camera) => Some(camera),
        Err(e) => {
            warn!("Densifier '{}': {}", name, e);
            None
        }
    }
}

fn log_settings(name: &str, settings: &DensifierSettings) {
    info!("Densifier settings:");
    info!("  backend: {}", name);
    info!("  n_frames: {}", settings.n_frames);
    info!("  resize_factor: {}", settings.resize_factor);
    info!("  min_baseline: {} m", settings.min_baseline);
}
