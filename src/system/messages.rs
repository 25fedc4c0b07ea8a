//! Message types exchanged between the stage thread and its owner.

use crate::frame::Frame;
use crate::grid::CvGridMap;
use crate::stage::DenseOutput;

/// Commands sent to a running stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Drop all buffered frames and internal stage state.
    Reset,
    /// Finish the current cycle and exit.
    Shutdown,
}

/// Result delivered by a stage through a [`crate::stage::ChannelSink`].
#[derive(Debug)]
pub enum StageOutput {
    /// Frame with an accepted depth map.
    Dense(DenseOutput),
    /// Frame that bypassed processing, unchanged.
    Forwarded(Frame),
    /// Frame with its orthophoto grid.
    Ortho { frame: Frame, grid: CvGridMap },
}

impl StageOutput {
    pub fn frame(&self) -> &Frame {
        match self {
            StageOutput::Dense(output) => &output.frame,
            StageOutput::Forwarded(frame) => frame,
            StageOutput::Ortho { frame, .. } => frame,
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            StageOutput::Dense(output) => output.frame,
            StageOutput::Forwarded(frame) => frame,
            StageOutput::Ortho { frame, .. } => frame,
        }
    }
}
