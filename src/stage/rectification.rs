//! Rectification stage: turns frames carrying a surface into orthophoto grids.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::ortho::rectify;

use super::sink::StageSink;
use super::{FrameIngest, Stage};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RectificationSettings {
    /// Frames waiting for rectification. The oldest is dropped on overflow.
    pub queue_size: usize,
    /// Rate of the stage loop, Hz.
    pub rate_hz: f64,
}

impl Default for RectificationSettings {
    fn default() -> Self {
        Self {
            queue_size: 5,
            rate_hz: 10.0,
        }
    }
}

impl RectificationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            bail!("Rectification queue must hold at least one frame");
        }
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            bail!("Invalid stage rate {} Hz", self.rate_hz);
        }
        Ok(())
    }
}

/// Bounded FIFO of frames awaiting rectification.
pub struct RectificationIngest {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl RectificationIngest {
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn pop(&self) -> Option<Frame> {
        self.queue.lock().pop_front()
    }
}

impl FrameIngest for RectificationIngest {
    fn add_frame(&self, frame: Frame) {
        let mut queue = self.queue.lock();
        queue.push_back(frame);
        while queue.len() > self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!("Rectification queue full, dropped frame {}", dropped.id);
            }
        }
    }

    fn reset(&self) {
        self.queue.lock().clear();
    }
}

#[derive(Debug, Default, Clone)]
pub struct RectificationStats {
    pub rectified: u64,
    pub forwarded: u64,
    pub failures: u64,
}

pub struct RectificationStage {
    settings: RectificationSettings,
    ingest: Arc<RectificationIngest>,
    sink: Box<dyn StageSink>,
    stats: RectificationStats,
}

impl RectificationStage {
    pub fn new(settings: RectificationSettings, sink: Box<dyn StageSink>) -> Result<Self> {
        settings.validate()?;
        let ingest = Arc::new(RectificationIngest {
            queue: Mutex::new(VecDeque::with_capacity(settings.queue_size)),
            capacity: settings.queue_size,
        });
        Ok(Self {
            settings,
            ingest,
            sink,
            stats: RectificationStats::default(),
        })
    }

    pub fn queue(&self) -> &Arc<RectificationIngest> {
        &self.ingest
    }

    pub fn stats(&self) -> &RectificationStats {
        &self.stats
    }
}

impl Stage for RectificationStage {
    fn name(&self) -> &'static str {
        "rectification"
    }

    fn ingest(&self) -> Arc<dyn FrameIngest> {
        self.ingest.clone()
    }

    fn process(&mut self) -> bool {
        let Some(frame) = self.ingest.pop() else {
            return false;
        };
        if frame.surface.is_none() {
            debug!("Frame {} has no surface, forwarding", frame.id);
            self.stats.forwarded += 1;
            self.sink.forward_frame(frame);
            return true;
        }

        let t_start = Instant::now();
        match rectify(&frame) {
            Ok(grid) => {
                debug!(
                    "Timing [Rectification]: {} ms",
                    t_start.elapsed().as_millis()
                );
                self.stats.rectified += 1;
                self.sink.publish_ortho(frame, grid);
            }
            Err(e) => {
                warn!("Rectification of frame {} failed: {:#}", frame.id, e);
                self.stats.failures += 1;
                self.stats.forwarded += 1;
                self.sink.forward_frame(frame);
            }
        }
        true
    }

    fn reset(&mut self) {
        self.ingest.reset();
        info!("Rectification stage reset");
    }

    fn init_stage_callback(&mut self, stage_path: &Path) -> Result<()> {
        debug!(
            "Rectification stage writes nothing below {:?}",
            stage_path.join(self.name())
        );
        Ok(())
    }

    fn print_settings_to_log(&self) {
        info!("Rectification stage settings:");
        info!("  queue_size: {}", self.settings.queue_size);
        info!("  rate: {} Hz", self.settings.rate_hz);
    }
}
