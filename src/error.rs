//! Error types for this crate's write and read paths.

use std::io;

/// Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Reason a path addition was rejected by the [`crate::pathset::PathSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathConflictKind {
    /// A directory was added whose path (or an ancestor of it) is already a known file.
    FileClobbersDirectory,
    /// A file was added whose path is already a known directory.
    DirectoryClobbersFile,
    /// A file was added whose path (or an ancestor of it) is already a known file.
    Conflict,
}

impl std::fmt::Display for PathConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathConflictKind::FileClobbersDirectory => {
                write!(f, "a file already occupies this path or one of its ancestors")
            }
            PathConflictKind::DirectoryClobbersFile => {
                write!(f, "this path is already registered as a directory")
            }
            PathConflictKind::Conflict => {
                write!(f, "this path (or an ancestor of it) already exists")
            }
        }
    }
}

/// Error types that can occur during ZIP operations
#[derive(Debug)]
pub enum ZipError {
    /// I/O error bubbled up from the underlying sink or source.
    Io(io::Error),
    /// The sink does not support the append-write capability required at construction.
    InvalidOutput(String),
    /// A storage mode other than 0 (stored) or 8 (deflated) was requested.
    UnknownMode(u16),
    /// A filename's UTF-8 byte length exceeds 65535.
    Overflow { filename: String, len: usize },
    /// A path addition conflicted with an existing file or directory.
    PathConflict { path: String, kind: PathConflictKind },
    /// A stored entry added with its size declared upfront (no data descriptor) received a
    /// different number of body bytes than it declared.
    EntryBodySizeMismatch { declared: u64, actual: u64 },
    /// The sink's offset did not match the sum of the entries' and fillers' byte spans at close.
    OffsetOutOfSync { entries_total: u64, sink_position: u64 },
    /// Invalid ZIP format or structure encountered while reading.
    InvalidFormat(String),
    /// Entry not found in ZIP archive.
    EntryNotFound(String),
    /// Unsupported compression method encountered while reading.
    UnsupportedCompression(u16),
    /// A read-side feature this crate does not implement (multi-disk spanning, encryption).
    UnsupportedFeature(String),
    /// No End Of Central Directory record could be located in the source.
    MissingEOCD,
    /// A local-header-derived field was requested before the local header was read.
    LocalHeaderPending,
}

impl std::fmt::Display for ZipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipError::Io(e) => write!(f, "I/O error: {}", e),
            ZipError::InvalidOutput(msg) => write!(f, "invalid output sink: {}", msg),
            ZipError::UnknownMode(m) => write!(f, "unknown storage mode: {}", m),
            ZipError::Overflow { filename, len } => write!(
                f,
                "filename {:?} is {} bytes, exceeding the 65535-byte ZIP limit",
                filename, len
            ),
            ZipError::PathConflict { path, kind } => {
                write!(f, "path conflict at {:?}: {}", path, kind)
            }
            ZipError::EntryBodySizeMismatch { declared, actual } => write!(
                f,
                "entry body size mismatch: declared {} bytes, wrote {} bytes",
                declared, actual
            ),
            ZipError::OffsetOutOfSync { entries_total, sink_position } => write!(
                f,
                "entries add up to {} bytes and the IO is at {} bytes; \
                 did you forget to call simulate_write() after a bypass write?",
                entries_total, sink_position
            ),
            ZipError::InvalidFormat(msg) => write!(f, "invalid ZIP format: {}", msg),
            ZipError::EntryNotFound(name) => write!(f, "entry not found: {}", name),
            ZipError::UnsupportedCompression(method) => {
                write!(f, "unsupported compression method: {}", method)
            }
            ZipError::UnsupportedFeature(what) => write!(f, "unsupported feature: {}", what),
            ZipError::MissingEOCD => write!(f, "no end-of-central-directory record found"),
            ZipError::LocalHeaderPending => {
                write!(f, "local header has not been read for this entry yet")
            }
        }
    }
}

impl std::error::Error for ZipError {}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        ZipError::Io(err)
    }
}
