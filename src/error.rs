use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `vfspack` crate.
///
/// Every variant except the scan-time skips (which are only logged) is fatal:
/// the in-flight archive is abandoned as soon as one is raised, and no cleanup
/// of a partially written destination is attempted.
#[derive(Debug, Error)]
pub enum VfsError {
    /// An I/O error occurred, typically while creating or writing the archive.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// A source file could not be read back after it was scanned. Raised when
    /// a file disappears, loses permissions, or shrinks below its recorded
    /// size between the scan and the copy.
    #[error("cannot read source file '{}': {source}", path.display())]
    SourceRead {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// A source path does not fit the fixed 256-byte name slot of an index
    /// record.
    #[error("path '{}' encodes to {len} bytes, which exceeds the 256-byte name slot", path.display())]
    NameOverflow { path: PathBuf, len: usize },

    /// The destination file did not end up with the requested length after
    /// preallocation.
    #[error("allocated '{}' to {expected} bytes but the file reports {actual}", path.display())]
    Allocation {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The computed layout and the bytes actually produced disagree. This is
    /// an internal consistency failure, not a user error.
    #[error("layout consistency failure: {0}")]
    Layout(String),

    /// An existing file does not parse as a valid archive.
    #[error("'{}' is not a valid archive: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    /// A wrapper for any other error that doesn't fit the specific variants.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VfsError::Io {
            source,
            path: path.into(),
        }
    }

    pub(crate) fn source_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VfsError::SourceRead {
            source,
            path: path.into(),
        }
    }
}
