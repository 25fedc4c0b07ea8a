//! Densifier configuration.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Backend name of [`crate::densifier::PlanarDensifier`].
pub const BACKEND_PLANE: &str = "plane";

/// Backend name of [`crate::densifier::SparseDensifier`].
pub const BACKEND_SPARSE: &str = "sparse";

/// Settings shared by all densifier backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DensifierSettings {
    /// Backend selected by [`crate::densifier::create_densifier`].
    pub backend: String,

    /// Number of posed frames one reconstruction consumes.
    pub n_frames: usize,

    /// Scale of the depth map relative to the source image (1.0 = full size).
    pub resize_factor: f64,

    /// Minimum distance (meters) between the reference camera and every
    /// other camera of the window.
    pub min_baseline: f64,

    /// Search radius in depth map pixels for sparse interpolation.
    pub sparse_radius_px: f64,

    /// Inverse distance weighting exponent for sparse interpolation.
    pub sparse_power: f64,
}

impl Default for DensifierSettings {
    fn default() -> Self {
        Self {
            backend: BACKEND_PLANE.to_string(),
            n_frames: 2,
            resize_factor: 1.0,
            min_baseline: 0.0,
            sparse_radius_px: 50.0,
            sparse_power: 2.0,
        }
    }
}

impl DensifierSettings {
    /// Load settings from a YAML file. Missing keys take their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings: Self = serde_yaml::from_reader(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse densifier settings {:?}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_frames == 0 {
            bail!("Densifier needs at least one input frame");
        }
        if !(self.resize_factor.is_finite() && self.resize_factor > 0.0 && self.resize_factor <= 1.0) {
            bail!("Resize factor must be in (0, 1], got {}", self.resize_factor);
        }
        if !(self.min_baseline.is_finite() && self.min_baseline >= 0.0) {
            bail!("Invalid minimum baseline {}", self.min_baseline);
        }
        if !(self.sparse_radius_px.is_finite() && self.sparse_radius_px > 0.0) {
            bail!("Invalid sparse search radius {}", self.sparse_radius_px);
        }
        if !(self.sparse_power.is_finite() && self.sparse_power > 0.0) {
            bail!("Invalid sparse interpolation power {}", self.sparse_power);
        }
        Ok(())
    }
}
