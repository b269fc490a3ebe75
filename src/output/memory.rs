//! In-process sinks: a discarding one for degraded runs and a recording one

use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{OutputSink, SinkError};
use crate::Frame;

/// Accepts every frame and drops it
#[derive(Debug, Default)]
pub struct NullSink {
    published: u64,
}

impl NullSink {
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl OutputSink for NullSink {
    fn publish(&mut self, _frame: &Frame) -> Result<(), SinkError> {
        self.published += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// What a `MemorySink` saw for one publish call
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub at: Instant,
}

#[derive(Default)]
struct Record {
    frames: Vec<PublishedFrame>,
    fail_remaining: usize,
}

/// Records publish calls; clones share the same record
#[derive(Clone, Default)]
pub struct MemorySink {
    record: Arc<Mutex<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_remaining = count;
    }

    pub fn frames(&self) -> Vec<PublishedFrame> {
        self.lock().frames.clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.lock().frames.iter().map(|f| f.sequence).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn publish(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let mut record = self.lock();
        if record.fail_remaining > 0 {
            record.fail_remaining -= 1;
            return Err(SinkError::Rejected(format!("frame {}", frame.sequence)));
        }
        record.frames.push(PublishedFrame {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            at: Instant::now(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
