//! Where stages deliver their results.

use std::path::Path;

use anyhow::Result;
use crossbeam_channel::Sender;
use nalgebra::{DMatrix, Vector3};
use tracing::warn;

use crate::frame::{Depthmap, Frame, FrameId, RgbaImage};
use crate::grid::CvGridMap;
use crate::system::StageOutput;

/// A frame with its accepted depth map attached (`frame.depthmap` is set).
#[derive(Debug)]
pub struct DenseOutput {
    pub frame: Frame,
    /// Cells of the depth map that passed range and hull checks.
    pub mask: DMatrix<bool>,
    pub normals: Option<DMatrix<Vector3<f32>>>,
}

/// Downstream consumer of stage results.
///
/// All methods default to dropping the data, so sinks implement only what
/// they consume.
pub trait StageSink: Send {
    fn publish_dense(&mut self, output: DenseOutput) {
        let _ = output;
    }

    /// A frame that bypassed processing.
    fn forward_frame(&mut self, frame: Frame) {
        let _ = frame;
    }

    fn publish_ortho(&mut self, frame: Frame, grid: CvGridMap) {
        let _ = (frame, grid);
    }
}

/// Sends every result over a channel.
pub struct ChannelSink {
    sender: Sender<StageOutput>,
}

impl ChannelSink {
    pub fn new(sender: Sender<StageOutput>) -> Self {
        Self { sender }
    }

    fn send(&self, output: StageOutput) {
        if self.sender.send(output).is_err() {
            warn!("Output receiver disconnected, result dropped");
        }
    }
}

impl StageSink for ChannelSink {
    fn publish_dense(&mut self, output: DenseOutput) {
        self.send(StageOutput::Dense(output));
    }

    fn forward_frame(&mut self, frame: Frame) {
        self.send(StageOutput::Forwarded(frame));
    }

    fn publish_ortho(&mut self, frame: Frame, grid: CvGridMap) {
        self.send(StageOutput::Ortho { frame, grid });
    }
}

/// Intermediate or final product a stage may persist.
pub enum Artifact<'a> {
    BilateralDepth(&'a Depthmap),
    DenseDepth(&'a Depthmap),
    GuidedDepth(&'a Depthmap),
    SourceImage(&'a RgbaImage),
    SparsePoints(&'a [Vector3<f64>]),
    Thumbnail(&'a RgbaImage),
    Normals(&'a DMatrix<Vector3<f32>>),
}

impl Artifact<'_> {
    /// Short name used in logs and file names.
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::BilateralDepth(_) => "bilat",
            Artifact::DenseDepth(_) => "dense",
            Artifact::GuidedDepth(_) => "guided",
            Artifact::SourceImage(_) => "img",
            Artifact::SparsePoints(_) => "sparse",
            Artifact::Thumbnail(_) => "thumb",
            Artifact::Normals(_) => "normals",
        }
    }
}

/// Persists artifacts below a stage directory.
pub trait SaveSink: Send {
    /// Prepare the output directory. Called once before any `save`.
    fn init(&mut self, stage_dir: &Path) -> Result<()>;

    fn save(&mut self, id: FrameId, artifact: Artifact<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::survey_frame;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.forward_frame(survey_frame(1, 0, 0.0));
        sink.forward_frame(survey_frame(2, 0, 0.0));

        let ids: Vec<u64> = rx
            .try_iter()
            .map(|out| match out {
                StageOutput::Forwarded(frame) => frame.id.0,
                _ => panic!("unexpected output"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_disconnected_receiver_is_not_fatal() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.forward_frame(survey_frame(1, 0, 0.0));
    }
}
