//! Densification stage: buffers posed frames per source, reconstructs depth
//! maps and post-processes them before publishing.
//!
//! One cycle of [`DensificationStage::process`]:
//! 1. Forward frames that bypass reconstruction
//! 2. Pick the lowest source id with `n_frames` frames buffered
//! 3. Densify the window, its oldest frame being the reference
//! 4. Clip to the depth range, check temporal consistency
//! 5. Bilateral filter, mask, normals
//! 6. Save and publish

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use nalgebra::Point2;
use tracing::{debug, info, warn};

use crate::densifier::{Densifier, DensifierSettings, create_densifier};
use crate::depth::{
    ConsistencyFilter, ConsistencySettings, DepthRange, bilateral_filter, compute_depth_map_mask, compute_normals,
    force_in_range,
};
use crate::frame::image::thumbnail;
use crate::frame::{CameraId, Depthmap, Frame, FrameId, INVALID_DEPTH};
use crate::geometry::Plane;

use super::buffer::ReconstructionBuffers;
use super::settings::StageSettings;
use super::sink::{Artifact, DenseOutput, SaveSink, StageSink};
use super::{FrameIngest, Stage};

/// Routes incoming frames into reconstruction or pass-through.
pub struct DensificationIngest {
    buffers: Arc<ReconstructionBuffers>,
    use_reconstruction: bool,
}

impl FrameIngest for DensificationIngest {
    fn add_frame(&self, frame: Frame) {
        if !self.use_reconstruction {
            self.buffers.push_passthrough(frame);
            return;
        }
        if !frame.is_densifiable() {
            debug!(
                "Frame {} not densifiable (keyframe: {}, accurate pose: {}, sparse points: {})",
                frame.id,
                frame.is_keyframe,
                frame.has_accurate_pose,
                frame.sparse_points.len()
            );
            self.buffers.push_passthrough(frame);
            return;
        }
        self.buffers.push_reco(frame);
    }

    /// Clears the buffers. Consistency windows of the stage are dropped on
    /// its next cycle.
    fn reset(&self) {
        self.buffers.reset();
    }
}

/// Counters of the densification stage.
#[derive(Debug, Default, Clone)]
pub struct DensificationStats {
    pub reconstructions: u64,
    pub densifier_failures: u64,
    pub range_failures: u64,
    pub consistency_rejects: u64,
    pub forwarded: u64,
    pub published: u64,
}

pub struct DensificationStage {
    settings: StageSettings,
    densifier: Box<dyn Densifier>,
    reference_plane: Plane,
    ingest: Arc<DensificationIngest>,
    consistency_settings: Option<ConsistencySettings>,
    /// One window per source, valid for buffer epoch `consistency_epoch`.
    consistency: BTreeMap<CameraId, ConsistencyFilter>,
    consistency_epoch: u64,
    sink: Box<dyn StageSink>,
    saver: Option<Box<dyn SaveSink>>,
    saver_ready: bool,
    stats: DensificationStats,
}

impl DensificationStage {
    /// Create the stage with the densifier backend named in `densifier_settings`.
    pub fn new(
        settings: StageSettings,
        densifier_settings: &DensifierSettings,
        sink: Box<dyn StageSink>,
    ) -> Result<Self> {
        let densifier = create_densifier(densifier_settings)?;
        Self::with_densifier(settings, densifier, sink)
    }

    /// Create the stage with an already constructed densifier.
    pub fn with_densifier(
        settings: StageSettings,
        densifier: Box<dyn Densifier>,
        sink: Box<dyn StageSink>,
    ) -> Result<Self> {
        settings.validate()?;
        if settings.n_frames < densifier.n_input_frames() {
            bail!(
                "Stage buffers {} frames but densifier '{}' needs {}",
                settings.n_frames,
                densifier.name(),
                densifier.n_input_frames()
            );
        }
        let reference_plane = settings
            .reference_plane
            .to_plane()
            .with_context(|| format!("Degenerate reference plane {:?}", settings.reference_plane))?;
        let consistency_settings = settings
            .consistency
            .enabled
            .then(|| settings.consistency.clone());
        if settings.use_filter_guided {
            warn!("Guided filtering is not available, flag has no effect");
        }

        let ingest = Arc::new(DensificationIngest {
            buffers: ReconstructionBuffers::new(settings.n_frames),
            use_reconstruction: settings.use_reconstruction,
        });

        Ok(Self {
            settings,
            densifier,
            reference_plane,
            ingest,
            consistency_settings,
            consistency: BTreeMap::new(),
            consistency_epoch: 0,
            sink,
            saver: None,
            saver_ready: false,
            stats: DensificationStats::default(),
        })
    }

    /// Persist artifacts through `saver`, gated by the save settings.
    pub fn with_save_sink(mut self, saver: Box<dyn SaveSink>) -> Self {
        self.saver = Some(saver);
        self
    }

    pub fn buffers(&self) -> &Arc<ReconstructionBuffers> {
        &self.ingest.buffers
    }

    pub fn stats(&self) -> &DensificationStats {
        &self.stats
    }

    fn forward_passthrough(&mut self) {
        for frame in self.ingest.buffers.drain_passthrough() {
            debug!("Forwarding frame {} without reconstruction", frame.id);
            self.stats.forwarded += 1;
            self.sink.forward_frame(frame);
        }
    }

    /// Densify one window. Returns false if no source has enough frames.
    fn process_stereo_reconstruction(&mut self) -> bool {
        let n_frames = self.settings.n_frames;
        let buffers = Arc::clone(&self.ingest.buffers);
        let Some(id) = buffers.select_ready(n_frames) else {
            return false;
        };
        let Some((epoch, mut frames)) = buffers.take_window(id, n_frames) else {
            return false;
        };

        debug!(
            "Reconstructing {} from {} frames of {}",
            frames[0].id,
            frames.len(),
            id
        );
        let t_start = Instant::now();
        let result = self.densifier.densify(&frames, 0, &self.reference_plane);
        debug!(
            "Timing [Dense Reconstruction]: {} ms",
            t_start.elapsed().as_millis()
        );

        let reference = frames.remove(0);
        buffers.restore(id, epoch, frames);

        let Some(depthmap) = result else {
            warn!(
                "Densifier '{}' failed for frame {}, dropping it",
                self.densifier.name(),
                reference.id
            );
            self.stats.densifier_failures += 1;
            return true;
        };
        self.stats.reconstructions += 1;
        self.process_depthmap(reference, depthmap, epoch);
        true
    }

    fn depth_range(&self, frame: &Frame, depthmap: &Depthmap) -> Option<DepthRange> {
        let median = frame
            .median_scene_depth()
            .or_else(|| depthmap.median_depth().map(f64::from));
        self.settings.depth_range.resolve(median)
    }

    /// Run `depthmap` through the consistency window of its source.
    ///
    /// Returns the oldest pair of the window once it is confirmed, `None`
    /// while the window fills or if the depth map was rejected.
    fn confirm_consistency(
        &mut self,
        frame: Frame,
        depthmap: Depthmap,
        epoch: u64,
    ) -> Option<(Frame, Depthmap)> {
        let Some(settings) = self.consistency_settings.as_ref() else {
            return Some((frame, depthmap));
        };

        let current = self.ingest.buffers.epoch();
        if current != self.consistency_epoch {
            let pending: usize = self.consistency.values().map(ConsistencyFilter::len).sum();
            debug!("Buffers were reset, dropping {} pending depth maps", pending);
            self.consistency.clear();
            self.consistency_epoch = current;
        }
        if epoch != current {
            debug!("Frame {} was reconstructed before a reset, dropping it", frame.id);
            return None;
        }

        let filter = match self.consistency.entry(frame.camera_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => match ConsistencyFilter::new(settings.clone()) {
                Ok(filter) => e.insert(filter),
                Err(err) => {
                    warn!("Consistency window for {} unavailable: {:#}", frame.camera_id, err);
                    return None;
                }
            },
        };
        let confirmed = filter.push(frame, depthmap)?;
        match confirmed.depthmap {
            Some(depthmap) => Some((confirmed.frame, depthmap)),
            None => {
                self.stats.consistency_rejects += 1;
                None
            }
        }
    }

    fn process_depthmap(&mut self, frame: Frame, mut depthmap: Depthmap, epoch: u64) {
        let Some(range) = self.depth_range(&frame, &depthmap) else {
            warn!("Frame {}: no depth range available, dropping depth map", frame.id);
            self.stats.range_failures += 1;
            return;
        };
        let clipped = force_in_range(depthmap.data(), range);
        *depthmap.data_mut() = clipped;

        let Some((mut frame, mut depthmap)) = self.confirm_consistency(frame, depthmap, epoch) else {
            return;
        };
        let range = self.depth_range(&frame, &depthmap).unwrap_or(range);
        let id = frame.id;

        self.save(self.settings.save.save_dense, id, Artifact::DenseDepth(&depthmap));

        if self.settings.use_filter_bilat {
            let t_start = Instant::now();
            let filtered = bilateral_filter(depthmap.data(), &self.settings.bilateral);
            *depthmap.data_mut() = filtered;
            debug!("Timing [Bilateral Filter]: {} ms", t_start.elapsed().as_millis());
            self.save(self.settings.save.save_bilat, id, Artifact::BilateralDepth(&depthmap));
        }

        let sparse_px: Option<Vec<Point2<f64>>> = self.settings.use_sparse_mask.then(|| {
            frame
                .sparse_points_in(depthmap.camera())
                .into_iter()
                .map(|(px, _)| px)
                .collect()
        });
        let mask = compute_depth_map_mask(depthmap.data(), range, sparse_px.as_deref());
        depthmap
            .data_mut()
            .zip_apply(&mask, |d, keep| {
                if !keep {
                    *d = INVALID_DEPTH;
                }
            });

        let normals = self.settings.compute_normals.then(|| compute_normals(&depthmap));
        if let Some(normals) = &normals {
            self.save(self.settings.save.save_normals, id, Artifact::Normals(normals));
        }

        self.save(self.settings.save.save_imgs, id, Artifact::SourceImage(&frame.image));
        self.save(
            self.settings.save.save_sparse,
            id,
            Artifact::SparsePoints(&frame.sparse_points),
        );
        if self.settings.save.save_thumb {
            let thumb = thumbnail(&frame.image, self.settings.thumbnail_size);
            self.save(true, id, Artifact::Thumbnail(&thumb));
        }

        debug!(
            "Publishing frame {} with {:.1}% valid depth",
            id,
            depthmap.coverage() * 100.0
        );
        frame.depthmap = Some(depthmap);
        self.stats.published += 1;
        self.sink.publish_dense(DenseOutput {
            frame,
            mask,
            normals,
        });
    }

    fn save(&mut self, enabled: bool, id: FrameId, artifact: Artifact<'_>) {
        if !enabled || !self.saver_ready {
            return;
        }
        let Some(saver) = self.saver.as_mut() else {
            return;
        };
        let kind = artifact.kind();
        if let Err(e) = saver.save(id, artifact) {
            warn!("Failed to save {} of frame {}: {:#}", kind, id, e);
        }
    }
}

impl Stage for DensificationStage {
    fn name(&self) -> &'static str {
        "densification"
    }

    fn ingest(&self) -> Arc<dyn FrameIngest> {
        self.ingest.clone()
    }

    fn process(&mut self) -> bool {
        self.forward_passthrough();
        self.process_stereo_reconstruction()
    }

    fn reset(&mut self) {
        self.ingest.reset();
        self.consistency.clear();
        self.consistency_epoch = self.ingest.buffers.epoch();
        info!("Densification stage reset");
    }

    fn init_stage_callback(&mut self, stage_path: &Path) -> Result<()> {
        let stage_dir = stage_path.join(self.name());
        if let Some(saver) = self.saver.as_mut() {
            if self.settings.save.any() {
                saver.init(&stage_dir)?;
                self.saver_ready = true;
                info!("Saving densification output to {:?}", stage_dir);
            }
        }
        Ok(())
    }

    fn print_settings_to_log(&self) {
        info!("Densification stage settings:");
        self.settings.print_to_log();
        self.densifier.print_settings_to_log();
    }
}
