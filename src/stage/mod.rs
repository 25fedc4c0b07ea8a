//! Pipeline stages.
//!
//! A stage receives frames from a producer thread through its [`FrameIngest`]
//! handle and does its work in [`Stage::process`], which a
//! [`crate::system::StageRunner`] calls repeatedly on a dedicated thread.

mod buffer;
mod densification;
mod rectification;
mod settings;
mod sink;

pub use buffer::{BufferStats, ReconstructionBuffers};
pub use densification::{DensificationIngest, DensificationStage, DensificationStats};
pub use rectification::{RectificationIngest, RectificationSettings, RectificationStage, RectificationStats};
pub use settings::{DepthRangeSettings, SaveSettings, StageSettings};
pub use sink::{Artifact, ChannelSink, DenseOutput, SaveSink, StageSink};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::frame::Frame;

/// Producer side of a stage. Cheap to call from any thread.
pub trait FrameIngest: Send + Sync {
    fn add_frame(&self, frame: Frame);

    /// Drop every frame queued but not yet processed.
    fn reset(&self);
}

/// Lifecycle of one pipeline stage.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Handle for feeding frames while the stage runs on another thread.
    fn ingest(&self) -> Arc<dyn FrameIngest>;

    fn add_frame(&self, frame: Frame) {
        self.ingest().add_frame(frame);
    }

    /// Run one cycle. Returns true if work was done, false if idle.
    fn process(&mut self) -> bool;

    /// Drop queued frames and internal state.
    fn reset(&mut self);

    /// Prepare the stage output directory below `stage_path`.
    fn init_stage_callback(&mut self, stage_path: &Path) -> Result<()>;

    fn print_settings_to_log(&self);
}
