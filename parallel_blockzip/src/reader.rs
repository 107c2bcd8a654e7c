//! Chunk readers feeding the worker pool.
//!
//! Compression reads the source sequentially in adaptively sized chunks;
//! every worker owns its own file handle and claims byte ranges under the
//! budget lock. Decompression maps the archive, loads the index up front and
//! lets workers claim stored chunks through an atomic counter.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use memmap2::{Mmap, MmapOptions};

use crate::budget::MemoryBudget;
use crate::codec::Codec;
use crate::error::{ArchiveError, Result};
use crate::index::{ArchiveIndex, IndexEntry, LENGTH_FIELD_LEN};
use crate::lifecycle::Lifecycle;

/// A unit of work travelling from reader to worker to writer.
#[derive(Debug)]
pub struct Chunk {
    /// Dense sequence number assigned in read order.
    pub index: u64,
    pub payload: Vec<u8>,
    /// Budget blocks reserved for this chunk.
    pub block_units: u64,
}

/// Shared state of the compress-path reader.
pub struct ChunkSource<'a> {
    path: PathBuf,
    total_len: u64,
    budget: &'a MemoryBudget,
    lifecycle: &'a Lifecycle,
    poll_interval: Duration,
}

impl<'a> ChunkSource<'a> {
    /// Checks that `path` can be opened and records its length.
    pub fn open(
        path: &Path,
        budget: &'a MemoryBudget,
        lifecycle: &'a Lifecycle,
        poll_interval: Duration,
    ) -> Result<Self> {
        let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let total_len = file
            .metadata()
            .map_err(|e| ArchiveError::io(path, e))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            total_len,
            budget,
            lifecycle,
            poll_interval,
        })
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// True once every byte of the source has been claimed.
    pub fn read_ended(&self) -> bool {
        self.budget.lock().cursor.ended
    }

    /// Opens a reader with its own file handle, so workers never share a
    /// seek position.
    pub fn reader(&self) -> Result<ChunkReader<'_>> {
        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(ChunkReader { source: self, file })
    }
}

pub struct ChunkReader<'s> {
    source: &'s ChunkSource<'s>,
    file: File,
}

impl ChunkReader<'_> {
    /// Claims and reads the next chunk.
    ///
    /// Returns `Ok(None)` once the source is exhausted or the run has left
    /// the running state. While the budget is starved no read is issued;
    /// the caller sleeps until blocks are released.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let source = self.source;
        let budget = source.budget;
        let mut state = budget.lock();
        loop {
            if state.cursor.ended || !source.lifecycle.is_running() {
                return Ok(None);
            }
            let Some(planned) = budget.plan_chunk_blocks(&state) else {
                state = budget.wait_for_release(state, source.poll_interval);
                continue;
            };

            let remaining = source.total_len - state.cursor.position;
            let len = planned.saturating_mul(budget.block_size()).min(remaining) as usize;
            if len == 0 {
                state.cursor.ended = true;
                debug!("source exhausted after {} chunks", state.cursor.next_index);
                return Ok(None);
            }

            let mut payload = Vec::new();
            if payload.try_reserve_exact(len).is_err() {
                if !budget.shrink_after_exhaustion(&mut state, planned) {
                    return Err(ArchiveError::ResourceExhausted { requested: len });
                }
                warn!("could not allocate {len} bytes, halving chunk size");
                continue;
            }

            let index = state.cursor.next_index;
            let offset = state.cursor.position;
            let block_units = budget.blocks_for_len(len);
            state.cursor.next_index += 1;
            state.cursor.position += len as u64;
            state.chunk_blocks = planned;
            state.read += block_units;
            drop(state);

            debug!("chunk {index}: {len} bytes at offset {offset} ({planned} blocks planned)");
            payload.resize(len, 0);
            self.file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.read_exact(&mut payload))
                .map_err(|e| ArchiveError::io(&source.path, e))?;
            return Ok(Some(Chunk {
                index,
                payload,
                block_units,
            }));
        }
    }
}

/// Memory-mapped archive with its index loaded, shared by decompress workers.
pub struct ArchiveSource {
    map: Mmap,
    index: ArchiveIndex,
    logical: Vec<IndexEntry>,
    data_len: u64,
    next: AtomicU64,
    exhausted: AtomicBool,
}

impl ArchiveSource {
    /// Maps `path` and loads its index. A file that is not a valid archive
    /// fails here, before any worker starts.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let len = file.metadata().map_err(|e| ArchiveError::io(path, e))?.len();
        if len < LENGTH_FIELD_LEN as u64 {
            return Err(ArchiveError::format(format!(
                "file is {len} bytes, too short to hold a trailer"
            )));
        }
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| ArchiveError::io(path, e))?;

        let (index, data_len) = ArchiveIndex::locate(&map)?;
        let logical = index.in_logical_order();
        debug!(
            "loaded index of {} chunks ({} codec, {} data bytes)",
            logical.len(),
            index.codec(),
            data_len
        );
        Ok(Self {
            map,
            index,
            logical,
            data_len,
            next: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
        })
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn codec(&self) -> Codec {
        self.index.codec()
    }

    pub fn chunk_count(&self) -> u64 {
        self.logical.len() as u64
    }

    /// Length of the compressed chunk region in front of the trailer.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Claims the next unclaimed chunk. Each entry is handed out exactly once.
    pub fn claim(&self) -> Option<(IndexEntry, &[u8])> {
        let next = self.next.fetch_add(1, Ordering::Relaxed);
        match usize::try_from(next).ok().and_then(|i| self.logical.get(i)) {
            Some(entry) => Some((*entry, &self.map[entry.byte_range()])),
            None => {
                self.exhausted.store(true, Ordering::Release);
                None
            }
        }
    }

    /// True once every entry has been claimed.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }
}
