//! Parallel block archiver.
//!
//! A source file is split into sequential chunks whose size adapts to the
//! memory budget. A fixed pool of workers compresses or decompresses the
//! chunks independently and a single writer reassembles them. Compressed
//! archives end with an index mapping each chunk's sequence number to its
//! position in the file, so extraction can decode chunks in parallel and
//! still write them back in their original order.
//!
//! ```no_run
//! use parallel_blockzip::{compress_file, decompress_file, ArchiveConfig, Outcome};
//!
//! let config = ArchiveConfig::default();
//! let outcome = compress_file("data.bin", "data.bin.bzp", config.clone())?;
//! assert!(outcome.is_completed());
//! decompress_file("data.bin.bzp", "data.restored", config)?;
//! # Ok::<(), parallel_blockzip::ArchiveError>(())
//! ```

pub mod archiver;
pub mod budget;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod pool;
pub mod progress;
pub mod reader;
pub mod writer;

use std::path::{Path, PathBuf};

pub use archiver::{Archiver, Mode, Outcome, RunSummary};
pub use budget::MemoryBudget;
pub use codec::Codec;
pub use config::ArchiveConfig;
pub use error::{ArchiveError, Result};
pub use index::{ArchiveIndex, IndexEntry};
pub use lifecycle::{AbortHandle, RunState};
pub use progress::ProgressSnapshot;
pub use reader::Chunk;

/// Compresses `source` into a new archive at `destination`.
pub fn compress_file(
    source: impl Into<PathBuf>,
    destination: impl Into<PathBuf>,
    config: ArchiveConfig,
) -> Result<Outcome> {
    Archiver::compress(source, destination, config).run()
}

/// Restores the original file from the archive at `source`.
pub fn decompress_file(
    source: impl Into<PathBuf>,
    destination: impl Into<PathBuf>,
    config: ArchiveConfig,
) -> Result<Outcome> {
    Archiver::decompress(source, destination, config).run()
}

/// Loads and validates the index of an archive without extracting it.
pub fn inspect_archive(path: impl AsRef<Path>) -> Result<ArchiveIndex> {
    reader::ArchiveSource::open(path.as_ref()).map(|archive| archive.index().clone())
}
