//! Orchestrator: owns the lifecycle and wires readers, workers and the
//! writer together for one run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};
use log::{info, warn};

use crate::budget::MemoryBudget;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};
use crate::lifecycle::{AbortHandle, Lifecycle, RunState};
use crate::pool::{CompressJob, DecompressJob, WorkerPool};
use crate::progress::{Progress, ProgressSnapshot};
use crate::reader::{ArchiveSource, ChunkSource};
use crate::writer::{ArchiveWriter, OrderedWriter, OutputWriter, WriteSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
}

/// Statistics of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub mode: Mode,
    pub chunks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub workers: usize,
    /// Chunks handled by each worker, indexed by worker id.
    pub per_worker_chunks: Vec<u64>,
    pub elapsed: Duration,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(RunSummary),
    /// Stopped on request; the destination is incomplete and unusable.
    Aborted,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

pub struct Archiver {
    mode: Mode,
    source: PathBuf,
    destination: PathBuf,
    config: ArchiveConfig,
    lifecycle: Arc<Lifecycle>,
    progress: Arc<Progress>,
}

impl Archiver {
    pub fn new(
        mode: Mode,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            mode,
            source: source.into(),
            destination: destination.into(),
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn compress(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: ArchiveConfig,
    ) -> Self {
        Self::new(Mode::Compress, source, destination, config)
    }

    pub fn decompress(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: ArchiveConfig,
    ) -> Self {
        Self::new(Mode::Decompress, source, destination, config)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(Arc::clone(&self.lifecycle))
    }

    pub fn abort(&self) -> bool {
        self.lifecycle.abort()
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Blocks until the run reaches a terminal state or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> RunState {
        self.lifecycle.wait_terminal(timeout)
    }

    /// Runs the pipeline to the end on the calling thread.
    ///
    /// Returns [`Outcome::Aborted`] when stopped through [`Archiver::abort`]
    /// or an [`AbortHandle`], and an error when any stage failed. In both
    /// cases the destination may be partially written.
    pub fn run(&self) -> Result<Outcome> {
        match self.lifecycle.begin() {
            Ok(()) => {}
            Err(RunState::Aborted) => return Ok(Outcome::Aborted),
            Err(_) => return Err(ArchiveError::AlreadyStarted),
        }

        let started = Instant::now();
        let result = match self.mode {
            Mode::Compress => self.run_compress(),
            Mode::Decompress => self.run_decompress(),
        };

        let report = match result {
            Ok(report) => report,
            Err(err) => {
                self.lifecycle.fail(err);
                None
            }
        };

        match self.lifecycle.state() {
            RunState::Completed => {
                let (written, pool_chunks) = report.ok_or_else(|| {
                    ArchiveError::Unexpected("run completed without a summary".into())
                })?;
                let summary = RunSummary {
                    mode: self.mode,
                    chunks: written.chunks,
                    bytes_in: self.progress.snapshot().total,
                    bytes_out: written.bytes_written,
                    workers: pool_chunks.len(),
                    per_worker_chunks: pool_chunks,
                    elapsed: started.elapsed(),
                };
                info!(
                    "{:?} finished: {} chunks, {} -> {} bytes in {:.2?}",
                    summary.mode, summary.chunks, summary.bytes_in, summary.bytes_out, summary.elapsed
                );
                Ok(Outcome::Completed(summary))
            }
            RunState::Aborted => {
                warn!(
                    "run aborted; '{}' is incomplete",
                    self.destination.display()
                );
                Ok(Outcome::Aborted)
            }
            RunState::Failed => Err(self
                .lifecycle
                .take_error()
                .unwrap_or_else(|| ArchiveError::Unexpected("run failed without an error".into()))),
            state @ (RunState::Idle | RunState::Running) => {
                let err = ArchiveError::Unexpected(format!(
                    "pipeline stopped while still {state}"
                ));
                self.lifecycle.fail(err);
                Err(self
                    .lifecycle
                    .take_error()
                    .unwrap_or_else(|| ArchiveError::Unexpected("pipeline stalled".into())))
            }
        }
    }

    fn run_compress(&self) -> Result<Option<(WriteSummary, Vec<u64>)>> {
        self.config.validate()?;
        let poll = self.config.poll_interval;
        let lifecycle = self.lifecycle.as_ref();
        let progress = self.progress.as_ref();

        let budget = MemoryBudget::from_config(&self.config);
        let source = ChunkSource::open(&self.source, &budget, lifecycle, poll)?;
        progress.set_total(source.total_len());

        let pool = WorkerPool::new(self.config.resolved_workers())?;
        info!(
            "compressing '{}' ({} bytes) with {} workers using {}",
            self.source.display(),
            source.total_len(),
            pool.len(),
            self.config.codec
        );

        let out = OutputWriter::create(&self.destination)?;
        let writer = ArchiveWriter::new(out, self.config.codec, &budget, lifecycle, progress, poll);
        let (results_tx, results_rx) = unbounded();
        let job = CompressJob {
            source: &source,
            budget: &budget,
            lifecycle,
            progress,
            codec: self.config.codec,
            level: self.config.resolved_level(),
            results: results_tx,
        };

        let written = thread::scope(|s| {
            let writer = s.spawn(move || match writer.run(results_rx) {
                Ok(summary) => summary,
                Err(err) => {
                    lifecycle.fail(err);
                    None
                }
            });
            pool.run(lifecycle, |id, slot| job.run(id, slot));
            drop(job);
            writer.join()
        })
        .map_err(|_| ArchiveError::Unexpected("writer thread panicked".into()))?;

        Ok(written.map(|w| (w, pool.chunk_counts())))
    }

    fn run_decompress(&self) -> Result<Option<(WriteSummary, Vec<u64>)>> {
        self.config.validate()?;
        let poll = self.config.poll_interval;
        let lifecycle = self.lifecycle.as_ref();
        let progress = self.progress.as_ref();

        let archive = ArchiveSource::open(&self.source)?;
        progress.set_total(archive.data_len());

        let pool = WorkerPool::new(self.config.resolved_workers())?;
        info!(
            "extracting '{}' ({} chunks, {}) with {} workers",
            self.source.display(),
            archive.chunk_count(),
            archive.codec(),
            pool.len()
        );

        let out = OutputWriter::create(&self.destination)?;
        let writer = OrderedWriter::new(out, archive.chunk_count(), lifecycle, progress, poll);
        let (results_tx, results_rx) = bounded(pool.len() * 2);
        let job = DecompressJob {
            archive: &archive,
            lifecycle,
            progress,
            results: results_tx,
        };

        let written = thread::scope(|s| {
            let writer = s.spawn(move || match writer.run(results_rx) {
                Ok(summary) => summary,
                Err(err) => {
                    lifecycle.fail(err);
                    None
                }
            });
            pool.run(lifecycle, |id, slot| job.run(id, slot));
            drop(job);
            writer.join()
        })
        .map_err(|_| ArchiveError::Unexpected("writer thread panicked".into()))?;

        Ok(written.map(|w| (w, pool.chunk_counts())))
    }
}
