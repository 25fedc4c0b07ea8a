//! Temporal consistency filtering of depth maps.
//!
//! Depth maps of consecutive reconstructions are collected in a short window.
//! Once the window is full its oldest depth map is checked against all newer
//! ones: each newer map is rendered into the oldest camera and every cell it
//! agrees with (relative difference below the tolerance) earns a vote. Cells
//! with too few votes are invalidated, never averaged.

use std::collections::VecDeque;

use anyhow::{Result, bail};
use nalgebra::DMatrix;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::frame::{Depthmap, Frame, INVALID_DEPTH, is_valid_depth};

/// Consistency filter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsistencySettings {
    pub enabled: bool,
    /// Number of depth maps compared at once, including the checked one.
    pub window: usize,
    /// Maximum relative depth difference for two observations to agree.
    pub tolerance: f32,
    /// Votes needed to keep a cell. Clamped to `window - 1`.
    pub min_votes: usize,
    /// Depth maps keeping less than this fraction of valid cells are dropped.
    pub min_coverage: f64,
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window: 4,
            tolerance: 0.1,
            min_votes: 2,
            min_coverage: 0.3,
        }
    }
}

impl ConsistencySettings {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            bail!("Consistency window must hold at least one depth map");
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            bail!("Invalid consistency tolerance {}", self.tolerance);
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            bail!("Minimum coverage must be in [0, 1], got {}", self.min_coverage);
        }
        Ok(())
    }
}

/// The oldest frame of a full window with its filtered depth map.
///
/// `depthmap` is `None` if too few cells survived the check.
#[derive(Debug)]
pub struct ConfirmedDepth {
    pub frame: Frame,
    pub depthmap: Option<Depthmap>,
    pub coverage: f64,
}

/// Sliding window of (frame, depth map) pairs awaiting confirmation.
pub struct ConsistencyFilter {
    settings: ConsistencySettings,
    entries: VecDeque<(Frame, Depthmap)>,
}

impl ConsistencyFilter {
    pub fn new(settings: ConsistencySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            entries: VecDeque::with_capacity(settings.window),
            settings,
        })
    }

    /// Votes actually required, given the window size.
    pub fn required_votes(&self) -> usize {
        self.settings.min_votes.min(self.settings.window - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add a depth map. Returns the oldest entry once the window is full,
    /// `None` while it is still filling.
    pub fn push(&mut self, frame: Frame, depthmap: Depthmap) -> Option<ConfirmedDepth> {
        self.entries.push_back((frame, depthmap));
        if self.entries.len() < self.settings.window {
            debug!(
                "Consistency window filling: {}/{}",
                self.entries.len(),
                self.settings.window
            );
            return None;
        }

        let filtered = self.filter_oldest();
        let (frame, mut depthmap) = self.entries.pop_front()?;
        *depthmap.data_mut() = filtered;
        let coverage = depthmap.coverage();

        if coverage < self.settings.min_coverage {
            warn!(
                "Frame {}: consistent coverage {:.1}% below {:.1}%, dropping depth map",
                frame.id,
                coverage * 100.0,
                self.settings.min_coverage * 100.0
            );
            return Some(ConfirmedDepth {
                frame,
                depthmap: None,
                coverage,
            });
        }
        debug!("Frame {}: consistent coverage {:.1}%", frame.id, coverage * 100.0);
        Some(ConfirmedDepth {
            frame,
            depthmap: Some(depthmap),
            coverage,
        })
    }

    fn filter_oldest(&self) -> DMatrix<f32> {
        let Some((_, reference)) = self.entries.front() else {
            return DMatrix::zeros(0, 0);
        };
        let ref_data = reference.data();
        let mut votes = DMatrix::<usize>::zeros(ref_data.nrows(), ref_data.ncols());

        for (_, other) in self.entries.iter().skip(1) {
            let rendered = other.reproject_to(reference.camera());
            for ((vote, &d_ref), &d_other) in votes.iter_mut().zip(ref_data.iter()).zip(rendered.iter()) {
                if is_valid_depth(d_ref)
                    && is_valid_depth(d_other)
                    && ((d_other - d_ref) / d_ref).abs() < self.settings.tolerance
                {
                    *vote += 1;
                }
            }
        }

        let required = self.required_votes();
        ref_data.zip_map(&votes, |d, v| {
            if is_valid_depth(d) && v >= required {
                d
            } else {
                INVALID_DEPTH
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::survey_frame;

    fn depth_for(frame: &Frame, value: f32) -> Depthmap {
        let cam = frame.camera.clone();
        let data = DMatrix::from_element(cam.height() as usize, cam.width() as usize, value);
        Depthmap::new(data, cam).unwrap()
    }

    fn window_of_two() -> ConsistencyFilter {
        ConsistencyFilter::new(ConsistencySettings {
            window: 2,
            min_votes: 2,
            min_coverage: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_not_ready_while_filling() {
        let mut filter = window_of_two();
        let frame = survey_frame(0, 0, 0.0);
        let depth = depth_for(&frame, 50.0);
        assert!(filter.push(frame, depth).is_none());
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_min_votes_clamped_to_window() {
        let filter = window_of_two();
        assert_eq!(filter.required_votes(), 1);
    }

    #[test]
    fn test_disagreeing_cells_are_invalidated() {
        let mut filter = window_of_two();

        // Same pose twice, so cells map onto each other one to one.
        let first = survey_frame(0, 0, 0.0);
        let second = survey_frame(1, 0, 0.0);
        let mut first_depth = depth_for(&first, 50.0);
        first_depth.data_mut()[(10, 10)] = 40.0;
        first_depth.data_mut()[(20, 20)] = 51.0;
        let second_depth = depth_for(&second, 50.0);

        assert!(filter.push(first, first_depth).is_none());
        let confirmed = filter.push(second, second_depth).unwrap();
        assert_eq!(confirmed.frame.id.0, 0);

        let depth = confirmed.depthmap.unwrap();
        // 40 vs 50 differs by 25%.
        assert_eq!(depth.data()[(10, 10)], INVALID_DEPTH);
        // 51 vs 50 is within 10% and keeps the confirmed value.
        assert_eq!(depth.data()[(20, 20)], 51.0);
        assert_eq!(depth.data()[(5, 5)], 50.0);
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_low_coverage_drops_depth_map() {
        let mut filter = ConsistencyFilter::new(ConsistencySettings {
            window: 2,
            ..Default::default()
        })
        .unwrap();

        let first = survey_frame(0, 0, 0.0);
        let second = survey_frame(1, 0, 0.0);
        let first_depth = depth_for(&first, 50.0);
        let second_depth = depth_for(&second, 80.0);

        filter.push(first, first_depth);
        let confirmed = filter.push(second, second_depth).unwrap();
        assert!(confirmed.depthmap.is_none());
        assert_eq!(confirmed.coverage, 0.0);
    }
}
