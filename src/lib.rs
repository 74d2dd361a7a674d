//! # streamzip: streaming ZIP archive producer and reader
//!
//! `streamzip` builds ZIP archives onto any [`std::io::Write`] as entries arrive, without
//! buffering the whole archive or seeking backward — suited to generating downloads on demand,
//! piping into a socket, or writing straight to cloud object storage. It can also read an
//! existing archive back, either by parsing its central directory (the normal, fast path) or, for
//! archives that were truncated or never finalized, by walking local headers straight ahead.
//!
//! ## Features
//!
//! - **Streaming write**: entries are compressed and written as they're added; nothing is held in
//!   memory beyond one entry's body (or, in heuristic mode, up to 128 KiB of it).
//! - **Zip64**: large files, large archives, and large entry counts are promoted to Zip64 headers
//!   automatically, with no action required from the caller.
//! - **Conflict-checked paths**: adding `a/b.txt` after `a` was added as a file (or vice versa) is
//!   caught before any bytes are written, with an optional auto-rename escape hatch.
//! - **Size estimation**: predict an archive's exact final byte size from entry metadata alone,
//!   without writing or compressing anything.
//! - **Pull adaptor**: turn the push-based writer into a lazy byte-chunk iterator for use as an
//!   HTTP response body.
//!
//! ## Quick start
//!
//! ### Writing an archive
//!
//! ```
//! use streamzip::Streamer;
//!
//! let mut zip = Streamer::new(Vec::new());
//! zip.write_stored_file_with("hello.txt", 0, None, |w| w.write(b"Hello, World!"))?;
//! zip.write_deflated_file_with("notes.txt", 0, None, |w| w.write(b"Another file"))?;
//! zip.close()?;
//! let archive_bytes = zip.into_sink()?;
//! # Ok::<(), streamzip::ZipError>(())
//! ```
//!
//! ### Reading an archive back
//!
//! ```
//! use streamzip::{FileReader, Streamer};
//! use std::io::Cursor;
//!
//! let mut zip = Streamer::new(Vec::new());
//! zip.write_stored_file_with("hello.txt", 0, None, |w| w.write(b"Hello, World!"))?;
//! zip.close()?;
//! let archive_bytes = zip.into_sink()?;
//!
//! let mut reader = FileReader::from_reader(Cursor::new(archive_bytes))?;
//! let data = reader.read_entry_by_name("hello.txt")?;
//! assert_eq!(data, b"Hello, World!");
//! # Ok::<(), streamzip::ZipError>(())
//! ```

pub mod crc;
pub mod entry_writer;
pub mod error;
pub mod estimator;
pub mod format;
pub mod pathset;
pub mod pull;
pub mod reader;
pub mod sink;
pub mod streamer;

pub use error::{Result, ZipError};
pub use estimator::SizeEstimator;
pub use pull::{PullReader, RECOMMENDED_STREAMING_HEADERS};
pub use reader::{read_straight_ahead, Entry, Extractor, FileReader};
pub use streamer::{Streamer, StreamerOptions, Writable};
