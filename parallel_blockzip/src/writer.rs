//! Reassembly writers.
//!
//! A single writer thread drains the result channel. When compressing it
//! appends chunks in completion order and records where each one landed;
//! when decompressing it buffers early chunks and emits them strictly in
//! index order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};

use crate::budget::MemoryBudget;
use crate::codec::Codec;
use crate::error::{ArchiveError, Result};
use crate::index::{ArchiveIndex, IndexEntry};
use crate::lifecycle::Lifecycle;
use crate::progress::Progress;
use crate::reader::Chunk;

/// Destination stream that tracks its write position.
///
/// Errors carry the destination path so they can be reported as-is.
pub struct OutputWriter {
    inner: Box<dyn Write + Send>,
    path: PathBuf,
    position: u64,
}

impl OutputWriter {
    /// Creates (or truncates) the destination file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;
        Ok(Self::new(Box::new(BufWriter::new(file)), path))
    }

    pub fn new(inner: Box<dyn Write + Send>, path: &Path) -> Self {
        Self {
            inner,
            path: path.to_path_buf(),
            position: 0,
        }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)
            .map_err(|e| ArchiveError::io(&self.path, e))
    }

    /// Flushes the destination and returns the total bytes written.
    pub fn finish(mut self) -> Result<u64> {
        self.inner
            .flush()
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(self.position)
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What a writer produced once its run finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: u64,
    pub bytes_written: u64,
}

/// Compress-path writer: completion order plus a trailing index.
pub struct ArchiveWriter<'a> {
    out: OutputWriter,
    index: ArchiveIndex,
    budget: &'a MemoryBudget,
    lifecycle: &'a Lifecycle,
    progress: &'a Progress,
    poll_interval: Duration,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(
        out: OutputWriter,
        codec: Codec,
        budget: &'a MemoryBudget,
        lifecycle: &'a Lifecycle,
        progress: &'a Progress,
        poll_interval: Duration,
    ) -> Self {
        Self {
            out,
            index: ArchiveIndex::new(codec),
            budget,
            lifecycle,
            progress,
            poll_interval,
        }
    }

    /// Writes results until every worker has dropped its sender, then
    /// appends the trailer and marks the run completed.
    ///
    /// Returns `Ok(None)` if the run stopped (abort or another component's
    /// failure) before the archive was finished; the destination is then
    /// left incomplete.
    pub fn run(mut self, results: Receiver<Chunk>) -> Result<Option<WriteSummary>> {
        loop {
            if !self.lifecycle.is_running() {
                debug!("archive writer stopping: run is {}", self.lifecycle.state());
                return Ok(None);
            }
            match results.recv_timeout(self.poll_interval) {
                Ok(chunk) => {
                    let offset = self.out.position();
                    let length = chunk.payload.len() as u64;
                    self.out.write_chunk(&chunk.payload)?;
                    self.index.push(IndexEntry::new(chunk.index, offset, length));
                    self.budget.mark_written(chunk.block_units);
                    self.progress.add_written(length);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !self.lifecycle.is_running() {
            return Ok(None);
        }

        let read = self.budget.lock().cursor.next_index;
        if self.index.len() as u64 != read {
            return Err(ArchiveError::Unexpected(format!(
                "{} chunks were read but {} were written",
                read,
                self.index.len()
            )));
        }

        let trailer = self.index.encode_trailer()?;
        self.out.write_chunk(&trailer)?;
        let chunks = self.index.len() as u64;
        let bytes_written = self.out.finish()?;
        if self.lifecycle.complete() {
            info!("archive complete: {chunks} chunks, {bytes_written} bytes");
        }
        Ok(Some(WriteSummary {
            chunks,
            bytes_written,
        }))
    }
}

/// Decompress-path writer: restores the original chunk order.
pub struct OrderedWriter<'a> {
    out: OutputWriter,
    expected_chunks: u64,
    lifecycle: &'a Lifecycle,
    progress: &'a Progress,
    poll_interval: Duration,
}

impl<'a> OrderedWriter<'a> {
    pub fn new(
        out: OutputWriter,
        expected_chunks: u64,
        lifecycle: &'a Lifecycle,
        progress: &'a Progress,
        poll_interval: Duration,
    ) -> Self {
        Self {
            out,
            expected_chunks,
            lifecycle,
            progress,
            poll_interval,
        }
    }

    fn emit(&mut self, payload: &[u8]) -> Result<()> {
        self.out.write_chunk(payload)?;
        self.progress.add_written(payload.len() as u64);
        Ok(())
    }

    /// Writes chunks in ascending index order, parking early arrivals.
    pub fn run(mut self, results: Receiver<Chunk>) -> Result<Option<WriteSummary>> {
        let mut pending: HashMap<u64, Vec<u8>> = HashMap::new();
        let mut next_idx = 0u64;

        loop {
            if !self.lifecycle.is_running() {
                debug!("ordered writer stopping: run is {}", self.lifecycle.state());
                return Ok(None);
            }
            match results.recv_timeout(self.poll_interval) {
                Ok(chunk) if chunk.index == next_idx => {
                    self.emit(&chunk.payload)?;
                    next_idx += 1;

                    while let Some(payload) = pending.remove(&next_idx) {
                        self.emit(&payload)?;
                        next_idx += 1;
                    }
                }
                Ok(chunk) => {
                    pending.insert(chunk.index, chunk.payload);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !self.lifecycle.is_running() {
            return Ok(None);
        }
        if next_idx != self.expected_chunks || !pending.is_empty() {
            return Err(ArchiveError::Unexpected(format!(
                "output stopped at chunk {} of {} with {} chunks parked",
                next_idx,
                self.expected_chunks,
                pending.len()
            )));
        }

        let bytes_written = self.out.finish()?;
        if self.lifecycle.complete() {
            info!("extraction complete: {next_idx} chunks, {bytes_written} bytes");
        }
        Ok(Some(WriteSummary {
            chunks: next_idx,
            bytes_written,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use crate::lifecycle::RunState;

    fn running() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle.begin().unwrap();
        lifecycle
    }

    fn chunk(index: u64, payload: &[u8]) -> Chunk {
        Chunk {
            index,
            payload: payload.to_vec(),
            block_units: 1,
        }
    }

    #[test]
    fn test_ordered_writer_restores_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let lifecycle = running();
        let progress = Progress::default();
        let writer = OrderedWriter::new(
            OutputWriter::create(&path).unwrap(),
            4,
            &lifecycle,
            &progress,
            Duration::from_millis(1),
        );

        let (tx, rx) = unbounded();
        for (index, payload) in [(2, "cc"), (0, "aa"), (3, "dd"), (1, "bb")] {
            tx.send(chunk(index, payload.as_bytes())).unwrap();
        }
        drop(tx);

        let summary = writer.run(rx).unwrap().unwrap();
        assert_eq!(summary.chunks, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"aabbccdd");
        assert_eq!(lifecycle.state(), RunState::Completed);
        assert_eq!(progress.snapshot().produced, 8);
    }

    #[test]
    fn test_ordered_writer_detects_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = running();
        let progress = Progress::default();
        let writer = OrderedWriter::new(
            OutputWriter::create(&dir.path().join("out.bin")).unwrap(),
            3,
            &lifecycle,
            &progress,
            Duration::from_millis(1),
        );

        let (tx, rx) = unbounded();
        tx.send(chunk(0, b"a")).unwrap();
        tx.send(chunk(2, b"c")).unwrap();
        drop(tx);

        assert!(matches!(writer.run(rx), Err(ArchiveError::Unexpected(_))));
    }

    #[test]
    fn test_archive_writer_records_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bzp");
        let lifecycle = running();
        let progress = Progress::default();
        let budget = MemoryBudget::new(16, 100, 4);
        {
            let mut state = budget.lock();
            state.read = 2;
            state.processed = 2;
            state.cursor.next_index = 2;
        }
        let writer = ArchiveWriter::new(
            OutputWriter::create(&path).unwrap(),
            Codec::Zstd,
            &budget,
            &lifecycle,
            &progress,
            Duration::from_millis(1),
        );

        let (tx, rx) = unbounded();
        tx.send(chunk(1, b"second")).unwrap();
        tx.send(chunk(0, b"first")).unwrap();
        drop(tx);

        writer.run(rx).unwrap().unwrap();
        assert_eq!(lifecycle.state(), RunState::Completed);
        assert_eq!(budget.available_blocks(), 100);

        let archive = std::fs::read(&path).unwrap();
        let (index, data_end) = ArchiveIndex::locate(&archive).unwrap();
        assert_eq!(data_end, 11);
        assert_eq!(index.codec(), Codec::Zstd);
        assert_eq!(
            index.entries(),
            &[IndexEntry::new(1, 0, 6), IndexEntry::new(0, 6, 5)]
        );
    }

    #[test]
    fn test_writer_stops_on_abort() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = running();
        let progress = Progress::default();
        let writer = OrderedWriter::new(
            OutputWriter::create(&dir.path().join("out.bin")).unwrap(),
            10,
            &lifecycle,
            &progress,
            Duration::from_millis(1),
        );
        let (tx, rx) = unbounded::<Chunk>();
        lifecycle.abort();
        assert_eq!(writer.run(rx).unwrap(), None);
        drop(tx);
    }
}
