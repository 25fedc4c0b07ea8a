//! State shared between a stage thread and its owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Flags and counters of one stage runner.
#[derive(Debug, Default)]
pub struct RunnerState {
    /// Request the stage thread to exit after its current cycle.
    shutdown_requested: AtomicBool,

    /// True while the stage has nothing to do.
    idle: AtomicBool,

    /// Cycles in which the stage did work.
    busy_cycles: AtomicU64,

    /// Cycles in which the stage was idle.
    idle_cycles: AtomicU64,

    resets: AtomicU64,
}

impl RunnerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Record the outcome of one `process()` call.
    pub fn record_cycle(&self, busy: bool) {
        self.idle.store(!busy, Ordering::SeqCst);
        if busy {
            self.busy_cycles.fetch_add(1, Ordering::SeqCst);
        } else {
            self.idle_cycles.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    pub fn busy_cycles(&self) -> u64 {
        self.busy_cycles.load(Ordering::SeqCst)
    }

    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_counters() {
        let state = RunnerState::new();
        state.record_cycle(true);
        state.record_cycle(false);
        state.record_cycle(false);

        assert_eq!(state.busy_cycles(), 1);
        assert_eq!(state.idle_cycles(), 2);
        assert!(state.is_idle());
        assert!(!state.is_shutdown_requested());
    }
}
