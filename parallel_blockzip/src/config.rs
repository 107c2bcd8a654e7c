use std::time::Duration;

use crate::codec::Codec;
use crate::error::{ArchiveError, Result};

/// Memory-accounting unit used by the budget tracker.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Upper bound on the size of a single chunk.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1024 * 1024 * 1024;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning knobs for an archive run.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Number of pool workers; `None` uses the available hardware parallelism.
    pub workers: Option<usize>,
    pub block_size: u64,
    pub max_buffer_size: u64,
    /// Overrides the sampled available system memory, in bytes.
    pub memory_limit: Option<u64>,
    pub codec: Codec,
    /// Codec level; `None` uses [`Codec::default_level`].
    pub level: Option<i32>,
    /// Longest time any stage sleeps before re-checking the lifecycle.
    pub poll_interval: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            workers: None,
            block_size: DEFAULT_BLOCK_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            memory_limit: None,
            codec: Codec::default(),
            level: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ArchiveConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: u64) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Worker count actually used for a run.
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn resolved_level(&self) -> i32 {
        self.level.unwrap_or_else(|| self.codec.default_level())
    }

    /// Largest chunk expressed in budget blocks.
    pub fn max_buffer_blocks(&self) -> u64 {
        (self.max_buffer_size / self.block_size).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ArchiveError::InvalidConfig("block size must be positive".into()));
        }
        if self.max_buffer_size < self.block_size {
            return Err(ArchiveError::InvalidConfig(format!(
                "max buffer size {} is smaller than the block size {}",
                self.max_buffer_size, self.block_size
            )));
        }
        if self.max_buffer_size > usize::MAX as u64 {
            return Err(ArchiveError::InvalidConfig(
                "max buffer size does not fit in memory on this platform".into(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ArchiveError::InvalidConfig("worker count must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ArchiveError::InvalidConfig("poll interval must be positive".into()));
        }
        let (lo, hi) = self.codec.level_range();
        let level = self.resolved_level();
        if !(lo..=hi).contains(&level) {
            return Err(ArchiveError::InvalidConfig(format!(
                "{} level {} is outside {}..={}",
                self.codec, level, lo, hi
            )));
        }
        Ok(())
    }
}
