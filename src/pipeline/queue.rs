//! FIFO frame queue shared by the producer and the pacer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crossbeam::utils::CachePadded;

use crate::Frame;

/// Unbounded FIFO of decoded frames
///
/// Every push and pop goes through one mutex. Consumers never block on it
/// beyond the critical section: `try_pop` returns immediately when empty.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        // A panicked holder cannot leave the deque half-updated
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Producer: append a frame
    pub fn push(&self, frame: Frame) {
        self.lock().push_back(frame);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: take the oldest frame, if any
    pub fn try_pop(&self) -> Option<Frame> {
        let frame = self.lock().pop_front()?;
        self.stats.frames_popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// (pushed, popped) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.frames_pushed.load(Ordering::Relaxed),
            self.stats.frames_popped.load(Ordering::Relaxed),
        )
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
