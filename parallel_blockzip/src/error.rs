//! Error taxonomy for archive runs.
//!
//! Every pipeline component catches its own faults and records the first
//! fatal one on the shared lifecycle; the orchestrator hands it back to the
//! caller from [`Archiver::run`](crate::Archiver::run).

use std::io;
use std::path::PathBuf;

/// Errors produced while compressing, decompressing or inspecting an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The input is not an archive of this format (bad trailer or index).
    #[error("not a valid blockzip archive: {0}")]
    Format(String),

    /// A file could not be opened, read or written.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A buffer of the requested size could not be allocated.
    #[error("not enough memory to allocate {requested} bytes")]
    ResourceExhausted { requested: usize },

    /// A stored chunk could not be decoded by its codec.
    #[error("chunk {index} is corrupt: {source}")]
    Codec {
        index: u64,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `run` was called on an archiver that has already left the idle state.
    #[error("archiver has already been started")]
    AlreadyStarted,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ArchiveError::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
