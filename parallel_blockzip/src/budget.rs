//! Memory budget tracker and adaptive chunk sizing.
//!
//! Memory is accounted in blocks of `block_size` bytes. At startup the
//! tracker derives `max_blocks = available_memory / (2 * block_size)`; the
//! factor of two leaves room for a chunk's raw and encoded forms living at
//! the same time. Three monotonically increasing counters track the blocks
//! that have been read, processed by a worker and written by the writer, so
//! the blocks still held in memory are `2 * read - processed - written`.
//!
//! The compress-path read cursor lives under the same lock, which makes
//! "pick a size, claim an index, advance the file position" a single step.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use sysinfo::System;

use crate::config::ArchiveConfig;

/// No chunk is read while this many blocks or fewer are available.
pub const STARVED_BLOCKS: u64 = 2;

/// Floor for `max_blocks`, so an idle pipeline can always claim one block.
pub const MIN_BUDGET_BLOCKS: u64 = STARVED_BLOCKS + 2;

/// Used when the platform cannot report available memory.
const FALLBACK_AVAILABLE_MEMORY: u64 = 1024 * 1024 * 1024;

/// Compress-path read position, guarded by the budget lock.
#[derive(Debug, Default)]
pub(crate) struct ReadCursor {
    pub(crate) position: u64,
    pub(crate) next_index: u64,
    pub(crate) ended: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BudgetState {
    pub(crate) read: u64,
    pub(crate) processed: u64,
    pub(crate) written: u64,
    /// Size of the previously planned chunk, in blocks.
    pub(crate) chunk_blocks: u64,
    /// Cap installed after an allocation failure.
    pub(crate) ceiling: Option<u64>,
    pub(crate) cursor: ReadCursor,
}

impl BudgetState {
    fn in_flight(&self) -> u64 {
        (2 * self.read).saturating_sub(self.processed + self.written)
    }
}

/// Shared memory budget for one archive run.
#[derive(Debug)]
pub struct MemoryBudget {
    block_size: u64,
    max_blocks: u64,
    max_buffer_blocks: u64,
    state: Mutex<BudgetState>,
    released: Condvar,
}

impl MemoryBudget {
    /// Creates a tracker with an explicit block limit.
    pub fn new(block_size: u64, max_blocks: u64, max_buffer_blocks: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            max_blocks,
            max_buffer_blocks: max_buffer_blocks.max(1),
            state: Mutex::new(BudgetState::default()),
            released: Condvar::new(),
        }
    }

    /// Creates a tracker from the configured limit, or from the memory the
    /// system reports as available right now.
    pub fn from_config(config: &ArchiveConfig) -> Self {
        let memory = config.memory_limit.unwrap_or_else(sample_available_memory);
        let max_blocks = (memory / (2 * config.block_size)).max(MIN_BUDGET_BLOCKS);
        debug!(
            "memory budget: {} bytes available, {} blocks of {} bytes",
            memory, max_blocks, config.block_size
        );
        Self::new(config.block_size, max_blocks, config.max_buffer_blocks())
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn max_blocks(&self) -> u64 {
        self.max_blocks
    }

    /// Blocks that can still be reserved by new chunks.
    pub fn available_blocks(&self) -> u64 {
        let state = self.lock();
        self.available_in(&state)
    }

    /// Number of budget blocks a payload of `len` bytes occupies.
    pub fn blocks_for_len(&self, len: usize) -> u64 {
        (len as u64).div_ceil(self.block_size).max(1)
    }

    /// Records that a worker has replaced `blocks` of raw data with its
    /// encoded form.
    pub fn mark_processed(&self, blocks: u64) {
        let mut state = self.lock();
        state.processed += blocks;
        drop(state);
        self.released.notify_all();
    }

    /// Records that the writer has flushed and dropped a chunk.
    pub fn mark_written(&self, blocks: u64) {
        let mut state = self.lock();
        state.written += blocks;
        drop(state);
        self.released.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn available_in(&self, state: &BudgetState) -> u64 {
        self.max_blocks.saturating_sub(state.in_flight())
    }

    /// Picks the size of the next chunk in blocks, or `None` when the budget
    /// is starved and no read may be issued.
    ///
    /// The size doubles while workers keep up with the writer and halves
    /// when they fall behind, clamped to `[1, max_buffer_blocks]` and to half
    /// of the available blocks.
    pub(crate) fn plan_chunk_blocks(&self, state: &BudgetState) -> Option<u64> {
        let available = self.available_in(state);
        if available <= STARVED_BLOCKS {
            return None;
        }
        let previous = state.chunk_blocks.max(1);
        let mut blocks = if state.processed >= state.written {
            previous.saturating_mul(2)
        } else if state.processed.saturating_mul(2) <= state.written {
            previous / 2
        } else {
            previous
        };
        blocks = blocks.clamp(1, self.max_buffer_blocks);
        if let Some(ceiling) = state.ceiling {
            blocks = blocks.min(ceiling);
        }
        Some(blocks.min(available / 2).max(1))
    }

    /// Halves future chunk requests after an allocation of `planned` blocks
    /// failed. Returns `false` when there is nothing left to halve.
    pub(crate) fn shrink_after_exhaustion(&self, state: &mut BudgetState, planned: u64) -> bool {
        if planned <= 1 {
            return false;
        }
        state.ceiling = Some(planned / 2);
        state.chunk_blocks = planned / 2;
        true
    }

    /// Sleeps until blocks are released or `timeout` elapses.
    pub(crate) fn wait_for_release<'a>(
        &self,
        guard: MutexGuard<'a, BudgetState>,
        timeout: Duration,
    ) -> MutexGuard<'a, BudgetState> {
        match self.released.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

fn sample_available_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    match system.available_memory() {
        0 => FALLBACK_AVAILABLE_MEMORY,
        bytes => bytes,
    }
}
