use std::sync::atomic::{AtomicU64, Ordering};

/// Byte and chunk counters updated by the pipeline while it runs.
///
/// `consumed` counts input bytes handed to the codec (raw bytes when
/// compressing, stored bytes when decompressing) and `total` is the size of
/// that input, so `consumed / total` is the fraction of work done.
#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicU64,
    consumed: AtomicU64,
    produced: AtomicU64,
    chunks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub consumed: u64,
    pub produced: u64,
    pub chunks: u64,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_consumed(&self, bytes: u64) {
        self.consumed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records one chunk flushed to the destination.
    pub(crate) fn add_written(&self, bytes: u64) {
        self.produced.fetch_add(bytes, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }
}
