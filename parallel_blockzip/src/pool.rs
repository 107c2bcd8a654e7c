//! Fixed-size worker pool.
//!
//! The pool owns one rayon thread per worker and an arena of [`WorkerSlot`]s
//! addressed by [`WorkerId`]. Each worker runs a job loop that pulls the next
//! chunk from its reader, runs the codec and hands the result to the writer.
//! Failures and panics are recorded on the lifecycle and never cross the
//! pool boundary.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::Sender;
use log::debug;

use crate::budget::MemoryBudget;
use crate::codec::Codec;
use crate::error::{ArchiveError, Result};
use crate::lifecycle::Lifecycle;
use crate::progress::Progress;
use crate::reader::{ArchiveSource, Chunk, ChunkSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

/// Per-worker counters.
#[derive(Debug, Default)]
pub struct WorkerSlot {
    chunks: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    finished: AtomicBool,
}

impl WorkerSlot {
    fn record(&self, bytes_in: u64, bytes_out: u64) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    slots: Vec<WorkerSlot>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("blockzip-worker-{i}"))
            .build()
            .map_err(|e| ArchiveError::Unexpected(format!("failed to build worker pool: {e}")))?;
        let slots = (0..workers).map(|_| WorkerSlot::default()).collect();
        Ok(Self { pool, slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: WorkerId) -> Option<&WorkerSlot> {
        self.slots.get(id.0)
    }

    /// Workers that have not returned from their job yet.
    pub fn live_workers(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_finished()).count()
    }

    pub fn chunk_counts(&self) -> Vec<u64> {
        self.slots.iter().map(WorkerSlot::chunks).collect()
    }

    /// Runs `job` once on every worker and blocks until all of them return.
    pub fn run<F>(&self, lifecycle: &Lifecycle, job: F)
    where
        F: Fn(WorkerId, &WorkerSlot) -> Result<()> + Sync,
    {
        let job = &job;
        self.pool.scope(|s| {
            for (i, slot) in self.slots.iter().enumerate() {
                s.spawn(move |_| {
                    let id = WorkerId(i);
                    match catch_unwind(AssertUnwindSafe(|| job(id, slot))) {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            lifecycle.fail(err);
                        }
                        Err(panic) => {
                            lifecycle.fail(ArchiveError::Unexpected(format!(
                                "worker {i} panicked: {}",
                                panic_message(panic.as_ref())
                            )));
                        }
                    }
                    slot.finished.store(true, Ordering::Release);
                    debug!(
                        "worker {i} finished: {} chunks, {} bytes in, {} bytes out",
                        slot.chunks(),
                        slot.bytes_in(),
                        slot.bytes_out()
                    );
                });
            }
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Compress worker loop: read a chunk, compress it, pass it on.
pub(crate) struct CompressJob<'a> {
    pub(crate) source: &'a ChunkSource<'a>,
    pub(crate) budget: &'a MemoryBudget,
    pub(crate) lifecycle: &'a Lifecycle,
    pub(crate) progress: &'a Progress,
    pub(crate) codec: Codec,
    pub(crate) level: i32,
    pub(crate) results: Sender<Chunk>,
}

impl CompressJob<'_> {
    pub(crate) fn run(&self, _id: WorkerId, slot: &WorkerSlot) -> Result<()> {
        let mut reader = self.source.reader()?;
        while self.lifecycle.is_running() {
            let Some(Chunk {
                index,
                payload: raw,
                block_units,
            }) = reader.next_chunk()?
            else {
                break;
            };

            let packed = self.codec.compress(&raw, self.level).map_err(|e| {
                ArchiveError::Unexpected(format!("failed to compress chunk {index}: {e}"))
            })?;
            let raw_len = raw.len() as u64;
            drop(raw);

            self.budget.mark_processed(block_units);
            self.progress.add_consumed(raw_len);
            slot.record(raw_len, packed.len() as u64);

            let result = Chunk {
                index,
                payload: packed,
                block_units,
            };
            if self.results.send(result).is_err() {
                // Writer is gone; the lifecycle says why.
                break;
            }
        }
        Ok(())
    }
}

/// Decompress worker loop: claim a stored chunk, decode it, pass it on.
pub(crate) struct DecompressJob<'a> {
    pub(crate) archive: &'a ArchiveSource,
    pub(crate) lifecycle: &'a Lifecycle,
    pub(crate) progress: &'a Progress,
    pub(crate) results: Sender<Chunk>,
}

impl DecompressJob<'_> {
    pub(crate) fn run(&self, _id: WorkerId, slot: &WorkerSlot) -> Result<()> {
        let codec = self.archive.codec();
        while self.lifecycle.is_running() {
            let Some((entry, stored)) = self.archive.claim() else {
                break;
            };
            let payload = codec.decompress(stored).map_err(|source| ArchiveError::Codec {
                index: entry.index,
                source,
            })?;

            self.progress.add_consumed(entry.length);
            slot.record(entry.length, payload.len() as u64);

            let result = Chunk {
                index: entry.index,
                payload,
                block_units: 0,
            };
            if self.results.send(result).is_err() {
                break;
            }
        }
        Ok(())
    }
}
