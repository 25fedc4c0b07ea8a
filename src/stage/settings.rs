//! Stage configuration, loaded from YAML.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use crate::depth::{BilateralSettings, ConsistencySettings, DepthRange};
use crate::geometry::PlaneSettings;

/// How the accepted depth interval of a reconstruction is chosen.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DepthRangeSettings {
    /// `[min_factor, max_factor] * median scene depth` of the reference frame.
    MedianRelative { min_factor: f64, max_factor: f64 },
    /// Fixed interval in meters.
    Fixed { min: f64, max: f64 },
}

impl Default for DepthRangeSettings {
    fn default() -> Self {
        DepthRangeSettings::MedianRelative {
            min_factor: 0.25,
            max_factor: 1.75,
        }
    }
}

impl DepthRangeSettings {
    /// Resolve the interval for a frame whose median scene depth is `median`.
    pub fn resolve(&self, median: Option<f64>) -> Option<DepthRange> {
        match *self {
            DepthRangeSettings::MedianRelative {
                min_factor,
                max_factor,
            } => {
                let median = median.filter(|m| m.is_finite() && *m > 0.0)?;
                Some(DepthRange::new(
                    (min_factor * median) as f32,
                    (max_factor * median) as f32,
                ))
            }
            DepthRangeSettings::Fixed { min, max } => Some(DepthRange::new(min as f32, max as f32)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = match *self {
            DepthRangeSettings::MedianRelative {
                min_factor,
                max_factor,
            } => (min_factor, max_factor),
            DepthRangeSettings::Fixed { min, max } => (min, max),
        };
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo < hi) {
            bail!("Invalid depth range [{}, {}]", lo, hi);
        }
        Ok(())
    }
}

/// Which artifacts a stage persists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    pub save_bilat: bool,
    pub save_dense: bool,
    /// Declared for the guided filter, which never produces output.
    pub save_guided: bool,
    pub save_imgs: bool,
    pub save_sparse: bool,
    pub save_thumb: bool,
    pub save_normals: bool,
}

impl SaveSettings {
    pub fn any(&self) -> bool {
        self.save_bilat
            || self.save_dense
            || self.save_guided
            || self.save_imgs
            || self.save_sparse
            || self.save_thumb
            || self.save_normals
    }
}

/// Settings of the densification stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Frames per source required before a reconstruction runs.
    pub n_frames: usize,

    /// Route frames into reconstruction. When false every frame passes through.
    pub use_reconstruction: bool,

    pub use_filter_bilat: bool,
    pub bilateral: BilateralSettings,

    /// Guided filtering is not implemented; setting this only logs a warning.
    pub use_filter_guided: bool,

    pub compute_normals: bool,

    /// Restrict the depth map mask to the convex hull of the sparse points.
    pub use_sparse_mask: bool,

    pub depth_range: DepthRangeSettings,
    pub consistency: ConsistencySettings,
    pub reference_plane: PlaneSettings,
    pub save: SaveSettings,

    /// Longer side of saved thumbnails, pixels.
    pub thumbnail_size: u32,

    /// Rate of the stage loop, Hz.
    pub rate_hz: f64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            n_frames: 2,
            use_reconstruction: true,
            use_filter_bilat: true,
            bilateral: BilateralSettings::default(),
            use_filter_guided: false,
            compute_normals: false,
            use_sparse_mask: false,
            depth_range: DepthRangeSettings::default(),
            consistency: ConsistencySettings::default(),
            reference_plane: PlaneSettings::default(),
            save: SaveSettings::default(),
            thumbnail_size: 256,
            rate_hz: 10.0,
        }
    }
}

impl StageSettings {
    /// Load settings from a YAML file. Missing keys take their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings: Self = serde_yaml::from_reader(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse stage settings {:?}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_frames == 0 {
            bail!("Stage needs at least one frame per reconstruction");
        }
        if self.bilateral.diameter == 0 {
            bail!("Bilateral filter diameter must be positive");
        }
        if !(self.bilateral.sigma_color > 0.0 && self.bilateral.sigma_space > 0.0) {
            bail!("Bilateral filter sigmas must be positive");
        }
        if self.reference_plane.to_plane().is_none() {
            bail!("Reference plane normal {:?} is degenerate", self.reference_plane.normal);
        }
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            bail!("Invalid stage rate {} Hz", self.rate_hz);
        }
        if self.thumbnail_size == 0 {
            bail!("Thumbnail size must be positive");
        }
        self.depth_range.validate()?;
        self.consistency.validate()?;
        Ok(())
    }

    pub fn print_to_log(&self) {
        info!("  n_frames: {}", self.n_frames);
        info!("  use_reconstruction: {}", self.use_reconstruction);
        info!("  use_filter_bilat: {}", self.use_filter_bilat);
        info!("  use_filter_guided: {}", self.use_filter_guided);
        info!("  compute_normals: {}", self.compute_normals);
        info!("  use_sparse_mask: {}", self.use_sparse_mask);
        info!("  depth_range: {:?}", self.depth_range);
        info!("  consistency: {:?}", self.consistency);
        info!("  save: {:?}", self.save);
        info!("  rate: {} Hz", self.rate_hz);
    }
}
