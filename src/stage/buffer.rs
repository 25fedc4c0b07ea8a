//! Bounded per-source frame buffers shared by the producer and the stage loop.
//!
//! Each source (camera id) owns a FIFO behind its own mutex; the map of
//! sources is behind an `RwLock` that is only write-locked to register a new
//! source or to reset. Locks are held for queue mutation only.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::frame::{CameraId, Frame};

/// Frames of one source, oldest first.
#[derive(Default)]
struct SourceQueue {
    frames: VecDeque<Frame>,
    last_timestamp_ns: Option<u64>,
}

/// Snapshot of the buffer counters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BufferStats {
    pub received: u64,
    pub passed_through: u64,
    pub dropped_overflow: u64,
    pub rejected_out_of_order: u64,
}

/// Reconstruction queues per source plus the pass-through queue.
pub struct ReconstructionBuffers {
    /// Maximum frames held per source.
    capacity: usize,
    queues: RwLock<BTreeMap<CameraId, Arc<Mutex<SourceQueue>>>>,
    passthrough: Mutex<VecDeque<Frame>>,
    /// Bumped by every reset. Windows taken before a reset are not restored.
    epoch: AtomicU64,
    received: AtomicU64,
    passed_through: AtomicU64,
    dropped_overflow: AtomicU64,
    rejected_out_of_order: AtomicU64,
}

impl ReconstructionBuffers {
    /// Buffers holding at most `n_frames + 1` frames per source.
    pub fn new(n_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: n_frames + 1,
            queues: RwLock::new(BTreeMap::new()),
            passthrough: Mutex::new(VecDeque::new()),
            epoch: AtomicU64::new(0),
            received: AtomicU64::new(0),
            passed_through: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            rejected_out_of_order: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn queue(&self, id: CameraId) -> Option<Arc<Mutex<SourceQueue>>> {
        self.queues.read().get(&id).cloned()
    }

    fn queue_or_insert(&self, id: CameraId) -> Arc<Mutex<SourceQueue>> {
        if let Some(queue) = self.queue(id) {
            return queue;
        }
        let mut queues = self.queues.write();
        queues
            .entry(id)
            .or_insert_with(|| {
                debug!("Registered reconstruction buffer for {}", id);
                Arc::new(Mutex::new(SourceQueue::default()))
            })
            .clone()
    }

    /// Append a frame to its source queue, dropping the oldest on overflow.
    ///
    /// Returns false if the frame is not newer than the last accepted frame
    /// of its source.
    pub fn push_reco(&self, frame: Frame) -> bool {
        self.received.fetch_add(1, Ordering::SeqCst);
        let queue = self.queue_or_insert(frame.camera_id);
        let mut queue = queue.lock();

        if let Some(last) = queue.last_timestamp_ns {
            if frame.timestamp_ns <= last {
                warn!(
                    "Rejected frame {} of {}: timestamp {} not after {}",
                    frame.id, frame.camera_id, frame.timestamp_ns, last
                );
                self.rejected_out_of_order.fetch_add(1, Ordering::SeqCst);
                return false;
            }
        }
        queue.last_timestamp_ns = Some(frame.timestamp_ns);
        queue.frames.push_back(frame);

        while queue.frames.len() > self.capacity {
            if let Some(dropped) = queue.frames.pop_front() {
                warn!(
                    "Reconstruction buffer of {} full, dropped frame {}",
                    dropped.camera_id, dropped.id
                );
                self.dropped_overflow.fetch_add(1, Ordering::SeqCst);
            }
        }
        true
    }

    /// Queue a frame that bypasses reconstruction.
    pub fn push_passthrough(&self, frame: Frame) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.passed_through.fetch_add(1, Ordering::SeqCst);
        self.passthrough.lock().push_back(frame);
    }

    /// Take all pass-through frames, oldest first.
    pub fn drain_passthrough(&self) -> Vec<Frame> {
        self.passthrough.lock().drain(..).collect()
    }

    /// Lowest source id with at least `n_frames` frames buffered.
    pub fn select_ready(&self, n_frames: usize) -> Option<CameraId> {
        let queues = self.queues.read();
        queues
            .iter()
            .find(|(_, queue)| queue.lock().frames.len() >= n_frames)
            .map(|(id, _)| *id)
    }

    /// Move the `n_frames` oldest frames of a source out of its queue.
    ///
    /// Returns the current epoch with the frames, to be passed back to
    /// [`ReconstructionBuffers::restore`].
    pub fn take_window(&self, id: CameraId, n_frames: usize) -> Option<(u64, Vec<Frame>)> {
        // The map read lock excludes a concurrent reset until the epoch is read.
        let queues = self.queues.read();
        let mut queue = queues.get(&id)?.lock();
        if queue.frames.len() < n_frames {
            return None;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let window = queue.frames.drain(..n_frames).collect();
        Some((epoch, window))
    }

    /// Put frames back at the front of their queue, keeping their order.
    ///
    /// Ignored if the buffers were reset since `epoch`.
    pub fn restore(&self, id: CameraId, epoch: u64, frames: Vec<Frame>) {
        if frames.is_empty() {
            return;
        }
        let queues = self.queues.read();
        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!("Discarding {} in-flight frames of {} after reset", frames.len(), id);
            return;
        }
        let Some(queue) = queues.get(&id) else {
            return;
        };
        let mut queue = queue.lock();
        for frame in frames.into_iter().rev() {
            queue.frames.push_front(frame);
        }
        while queue.frames.len() > self.capacity {
            if let Some(dropped) = queue.frames.pop_front() {
                warn!(
                    "Reconstruction buffer of {} full, dropped frame {}",
                    dropped.camera_id, dropped.id
                );
                self.dropped_overflow.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Remove the oldest frame of a source.
    pub fn pop_front(&self, id: CameraId) -> Option<Frame> {
        let queue = self.queue(id)?;
        let frame = queue.lock().frames.pop_front();
        frame
    }

    /// Drop every buffered frame of every source.
    pub fn reset(&self) {
        let queues = self.queues.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for queue in queues.values() {
            let mut queue = queue.lock();
            queue.frames.clear();
            queue.last_timestamp_ns = None;
        }
        self.passthrough.lock().clear();
    }

    /// Number of resets so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn reco_len(&self, id: CameraId) -> usize {
        match self.queue(id) {
            Some(queue) => {
                let len = queue.lock().frames.len();
                len
            }
            None => 0,
        }
    }

    pub fn passthrough_len(&self) -> usize {
        self.passthrough.lock().len()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            received: self.received.load(Ordering::SeqCst),
            passed_through: self.passed_through.load(Ordering::SeqCst),
            dropped_overflow: self.dropped_overflow.load(Ordering::SeqCst),
            rejected_out_of_order: self.rejected_out_of_order.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::survey_frame;
    use std::thread;

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let buffers = ReconstructionBuffers::new(3);
        for i in 0..10 {
            assert!(buffers.push_reco(survey_frame(i, 0, i as f64)));
            assert!(buffers.reco_len(CameraId(0)) <= 4);
        }
        assert_eq!(buffers.reco_len(CameraId(0)), 4);
        assert_eq!(buffers.stats().dropped_overflow, 6);
        // Oldest were dropped.
        assert_eq!(buffers.pop_front(CameraId(0)).unwrap().id.0, 6);
    }

    #[test]
    fn test_out_of_order_frames_are_rejected() {
        let buffers = ReconstructionBuffers::new(3);
        assert!(buffers.push_reco(survey_frame(5, 0, 0.0)));
        assert!(!buffers.push_reco(survey_frame(2, 0, 0.0)));
        // Other sources are independent.
        assert!(buffers.push_reco(survey_frame(2, 1, 0.0)));
        assert_eq!(buffers.stats().rejected_out_of_order, 1);
    }

    #[test]
    fn test_select_lowest_ready_id() {
        let buffers = ReconstructionBuffers::new(2);
        for i in 0..2 {
            buffers.push_reco(survey_frame(i, 7, 0.0));
            buffers.push_reco(survey_frame(i, 3, 0.0));
        }
        buffers.push_reco(survey_frame(0, 1, 0.0));

        assert_eq!(buffers.select_ready(2), Some(CameraId(3)));
        assert_eq!(buffers.select_ready(3), None);
    }

    #[test]
    fn test_take_and_restore_keep_order() {
        let buffers = ReconstructionBuffers::new(3);
        for i in 0..4 {
            buffers.push_reco(survey_frame(i, 0, 0.0));
        }
        let (epoch, mut window) = buffers.take_window(CameraId(0), 3).unwrap();
        assert_eq!(buffers.reco_len(CameraId(0)), 1);

        let reference = window.remove(0);
        assert_eq!(reference.id.0, 0);
        buffers.restore(CameraId(0), epoch, window);

        let ids: Vec<u64> = (0..3)
            .filter_map(|_| buffers.pop_front(CameraId(0)))
            .map(|f| f.id.0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_reset_discards_in_flight_window() {
        let buffers = ReconstructionBuffers::new(2);
        buffers.push_reco(survey_frame(0, 0, 0.0));
        buffers.push_reco(survey_frame(1, 0, 0.0));
        buffers.push_passthrough(survey_frame(2, 0, 0.0));

        let (epoch, window) = buffers.take_window(CameraId(0), 2).unwrap();
        buffers.reset();
        buffers.restore(CameraId(0), epoch, window);

        assert_eq!(buffers.reco_len(CameraId(0)), 0);
        assert_eq!(buffers.passthrough_len(), 0);
        // Timestamps start over after a reset.
        assert!(buffers.push_reco(survey_frame(0, 0, 0.0)));
    }

    #[test]
    fn test_concurrent_producers() {
        let buffers = ReconstructionBuffers::new(4);
        let handles: Vec<_> = (0..4)
            .map(|cam| {
                let buffers = Arc::clone(&buffers);
                thread::spawn(move || {
                    for i in 0..20 {
                        buffers.push_reco(survey_frame(i, cam, 0.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for cam in 0..4 {
            assert_eq!(buffers.reco_len(CameraId(cam)), 5);
        }
        let stats = buffers.stats();
        assert_eq!(stats.received, 80);
        assert_eq!(stats.dropped_overflow, 60);
    }

    #[test]
    fn test_reset_while_producers_push() {
        let buffers = ReconstructionBuffers::new(3);
        let producers: Vec<_> = (0..2)
            .map(|cam| {
                let buffers = Arc::clone(&buffers);
                thread::spawn(move || {
                    for i in 0..500 {
                        buffers.push_reco(survey_frame(i, cam, 0.0));
                    }
                })
            })
            .collect();
        let consumer = {
            let buffers = Arc::clone(&buffers);
            thread::spawn(move || {
                for _ in 0..500 {
                    if let Some((epoch, mut window)) = buffers.take_window(CameraId(0), 3) {
                        window.remove(0);
                        buffers.restore(CameraId(0), epoch, window);
                    }
                }
            })
        };
        for _ in 0..50 {
            buffers.reset();
            thread::yield_now();
        }
        for handle in producers {
            handle.join().unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(buffers.epoch(), 50);
        for cam in 0..2 {
            let id = CameraId(cam);
            assert!(buffers.reco_len(id) <= buffers.capacity());
            let timestamps: Vec<u64> = std::iter::from_fn(|| buffers.pop_front(id))
                .map(|f| f.timestamp_ns)
                .collect();
            assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
