//! Error type shared by the chunk codec and the directory layer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by chunk files and chunk directories.
#[derive(Debug, Error)]
pub enum Error {
    /// The path does not exist.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// A directory was expected.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// A regular file was expected, but the path is a directory.
    #[error("not a file: {}", path.display())]
    IsADirectory { path: PathBuf },

    /// Create-time guard: the file already holds data.
    #[error("file {} exists and not empty", path.display())]
    AlreadyExists { path: PathBuf },

    /// Zero-length chunk file.
    #[error("chunk file is empty: {}", path.display())]
    Empty { path: PathBuf },

    /// The gzip layer of a file could not be decompressed.
    #[error("failed to decompress {}: {source}", path.display())]
    Decompress {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A chunk in the stream could not be decoded.
    #[error("chunk {index} at byte offset {offset}: {source}")]
    Decode {
        index: usize,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// The flat channel snapshot could not be decoded.
    #[error("channel snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// A file failed while the directory was being scanned.
    #[error("{}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// An entity list file holds more entries than allowed.
    #[error("entity list exceeds {limit} entries")]
    TooManyEntries { limit: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound { path }
        } else {
            Error::Fs { path, source }
        }
    }

    /// Returns the innermost error, looking through `Scan` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Scan { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if the path (or the file in a failed scan) was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    /// Check if the file exists but cannot be used: zero length or undecodable.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self.root(),
            Error::Empty { .. }
                | Error::Decompress { .. }
                | Error::Decode { .. }
                | Error::Snapshot { .. }
        )
    }
}
