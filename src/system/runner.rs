//! Stage runner - drives one stage on a dedicated thread.
//!
//! The owner feeds frames through [`StageRunner::input`] from its own thread
//! and controls the stage through a channel. The stage thread calls
//! `process()` back to back while there is work and waits one period
//! (`1 / rate_hz`) on the control channel when the stage is idle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{info, warn};

use crate::frame::Frame;
use crate::stage::{FrameIngest, Stage};

use super::messages::ControlMsg;
use super::shared_state::RunnerState;

/// Capacity of the control channel. Control messages are rare.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// A stage running on its own thread.
pub struct StageRunner {
    name: &'static str,

    /// Producer handle of the stage.
    input: Arc<dyn FrameIngest>,

    /// Flags and counters shared with the stage thread.
    state: Arc<RunnerState>,

    /// Channel sender for control messages (owner -> stage thread).
    control: Sender<ControlMsg>,

    /// Handle to the stage thread.
    handle: Option<JoinHandle<()>>,
}

impl StageRunner {
    /// Move `stage` onto a new thread looping at `rate_hz` while idle.
    pub fn spawn(stage: Box<dyn Stage>, rate_hz: f64) -> Result<Self> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            bail!("Invalid stage rate {} Hz", rate_hz);
        }
        let period = Duration::from_secs_f64(1.0 / rate_hz);
        let name = stage.name();
        let input = stage.ingest();
        stage.print_settings_to_log();

        let state = RunnerState::new();
        let (control, control_rx) = bounded::<ControlMsg>(CONTROL_CHANNEL_CAPACITY);

        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_stage_loop(stage, control_rx, thread_state, period))
            .with_context(|| format!("Failed to spawn {} thread", name))?;

        Ok(Self {
            name,
            input,
            state,
            control,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Producer handle, usable from any thread.
    pub fn input(&self) -> Arc<dyn FrameIngest> {
        Arc::clone(&self.input)
    }

    pub fn add_frame(&self, frame: Frame) {
        self.input.add_frame(frame);
    }

    pub fn state(&self) -> &Arc<RunnerState> {
        &self.state
    }

    /// Ask the stage thread to reset its buffers and internal state.
    pub fn request_reset(&self) {
        if self.control.send(ControlMsg::Reset).is_err() {
            warn!("{} thread is gone, reset ignored", self.name);
        }
    }

    /// Stop the stage thread and wait for it.
    ///
    /// Frames still buffered are dropped.
    pub fn shutdown(&mut self) {
        self.state.request_shutdown();
        if let Some(handle) = self.handle.take() {
            // The thread may already have exited, in which case nobody listens.
            let _ = self.control.send(ControlMsg::Shutdown);
            if handle.join().is_err() {
                warn!("{} thread panicked", self.name);
            }
        }
    }
}

impl Drop for StageRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Main loop of a stage thread.
fn run_stage_loop(
    mut stage: Box<dyn Stage>,
    control: Receiver<ControlMsg>,
    state: Arc<RunnerState>,
    period: Duration,
) {
    let name = stage.name();
    info!("{} thread started", name);

    loop {
        if state.is_shutdown_requested() {
            break;
        }

        let busy = stage.process();
        state.record_cycle(busy);

        let msg = if busy {
            // More work may be waiting, only poll for control messages.
            match control.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match control.recv_timeout(period) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match msg {
            ControlMsg::Reset => {
                stage.reset();
                state.record_reset();
            }
            ControlMsg::Shutdown => break,
        }
    }

    info!(
        "{} thread exiting. Stats: busy_cycles={}, idle_cycles={}, resets={}",
        name,
        state.busy_cycles(),
        state.idle_cycles(),
        state.resets()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::densifier::DensifierSettings;
    use crate::stage::{ChannelSink, DensificationStage, StageSettings};
    use crate::system::StageOutput;
    use crate::test_utils::survey_frame;
    use crossbeam_channel::unbounded;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Stage that only counts calls.
    struct CountingStage {
        processed: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    struct NullIngest;

    impl FrameIngest for NullIngest {
        fn add_frame(&self, _frame: Frame) {}
        fn reset(&self) {}
    }

    impl Stage for CountingStage {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn ingest(&self) -> Arc<dyn FrameIngest> {
            Arc::new(NullIngest)
        }

        fn process(&mut self) -> bool {
            self.processed.fetch_add(1, Ordering::SeqCst);
            false
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn init_stage_callback(&mut self, _stage_path: &Path) -> Result<()> {
            Ok(())
        }

        fn print_settings_to_log(&self) {}
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_rejects_invalid_rate() {
        let stage = CountingStage {
            processed: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        };
        assert!(StageRunner::spawn(Box::new(stage), 0.0).is_err());
    }

    #[test]
    fn test_reset_and_shutdown() {
        let processed = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let stage = CountingStage {
            processed: Arc::clone(&processed),
            resets: Arc::clone(&resets),
        };
        let mut runner = StageRunner::spawn(Box::new(stage), 200.0).unwrap();

        runner.request_reset();
        assert!(wait_until(Duration::from_secs(5), || resets.load(Ordering::SeqCst) == 1));
        assert!(wait_until(Duration::from_secs(5), || runner.state().is_idle()));

        runner.shutdown();
        let cycles = processed.load(Ordering::SeqCst);
        assert!(cycles > 0);
        assert_eq!(runner.state().resets(), 1);

        // Nothing runs after shutdown, and shutting down twice is harmless.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(processed.load(Ordering::SeqCst), cycles);
        runner.shutdown();
    }

    #[test]
    fn test_densification_runs_on_worker_thread() {
        let (tx, rx) = unbounded();
        let stage = DensificationStage::new(
            StageSettings::default(),
            &DensifierSettings::default(),
            Box::new(ChannelSink::new(tx)),
        )
        .unwrap();
        let mut runner = StageRunner::spawn(Box::new(stage), 100.0).unwrap();

        let input = runner.input();
        let producer = thread::spawn(move || {
            for i in 0..3 {
                input.add_frame(survey_frame(i, 0, 2.0 * i as f64));
            }
        });
        producer.join().unwrap();

        let ids: Vec<u64> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .map(|out| match out {
                StageOutput::Dense(output) => output.frame.id.0,
                other => panic!("unexpected output for {}", other.frame().id),
            })
            .collect();
        assert_eq!(ids, vec![0, 1]);

        runner.shutdown();
        assert!(runner.state().busy_cycles() >= 2);
    }
}
