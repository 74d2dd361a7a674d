//! Per-entry write pipelines: the stored writer, the deflated writer, and the heuristic writer
//! that picks between them by actually trying compression on a buffered prefix.
//!
//! Each mode is a small struct around a `DeflateEncoder`/`Crc32Accumulator` pipeline so the
//! streamer can hold any of the three behind one type; the heuristic mode buffers and probes
//! compression before committing to one of the other two.

use crate::crc::Crc32Accumulator;
use crate::error::Result;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

/// Outcome of finishing an entry-body writer.
pub struct FinishedEntry {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Which storage mode a finished entry landed in, relevant to the heuristic writer which only
/// decides this once its buffering threshold is crossed or it's asked to finish early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Stored,
    Deflated,
}

impl StorageMode {
    pub fn code(self) -> u16 {
        match self {
            StorageMode::Stored => crate::format::STORED,
            StorageMode::Deflated => crate::format::DEFLATED,
        }
    }
}

/// Forwards bytes verbatim to the sink while tracking CRC32 and byte count.
pub struct StoredWriter<W: Write> {
    sink: W,
    crc: Crc32Accumulator,
    count: u64,
}

impl<W: Write> StoredWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, crc: Crc32Accumulator::new(), count: 0 }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.sink.write_all(buf)?;
        self.crc.update(buf);
        self.count += buf.len() as u64;
        Ok(())
    }

    /// Flush and hand back both the finished-entry summary and the recovered sink, so the caller
    /// can keep writing to it (the data descriptor, then further entries).
    pub fn finish(mut self) -> Result<(W, FinishedEntry)> {
        self.sink.flush()?;
        let finished = FinishedEntry {
            crc32: self.crc.value(),
            compressed_size: self.count,
            uncompressed_size: self.count,
        };
        Ok((self.sink, finished))
    }

    /// Recover the sink without writing anything further — there is nothing to flush beyond what
    /// has already reached it, since stored bytes never sit in an encoder.
    pub fn dispose_on_failure(self) -> W {
        self.sink
    }
}

/// Pushes bytes through a raw DEFLATE encoder, tracking CRC32 over the *uncompressed* bytes and
/// the compressed byte count of whatever the encoder emits to the sink.
pub struct DeflatedWriter<W: Write> {
    encoder: DeflateEncoder<CountingProxy<W>>,
    crc: Crc32Accumulator,
    uncompressed_count: u64,
}

/// A tiny `Write` shim so the `DeflateEncoder` can report how many compressed bytes it actually
/// emitted, without this module depending on `crate::sink::CountingWriter`'s position semantics
/// (which talk about the *streamer's* offset, a different concern).
struct CountingProxy<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingProxy<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> DeflatedWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_level(sink, Compression::default())
    }

    pub fn with_level(sink: W, level: Compression) -> Self {
        Self {
            encoder: DeflateEncoder::new(CountingProxy { inner: sink, count: 0 }, level),
            crc: Crc32Accumulator::new(),
            uncompressed_count: 0,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.encoder.write_all(buf)?;
        self.crc.update(buf);
        self.uncompressed_count += buf.len() as u64;
        Ok(())
    }

    /// Finalize the encoder and hand back both the finished-entry summary and the recovered sink.
    pub fn finish(self) -> Result<(W, FinishedEntry)> {
        let crc32 = self.crc.value();
        let uncompressed_size = self.uncompressed_count;
        let proxy = self.encoder.finish()?;
        let finished = FinishedEntry { crc32, compressed_size: proxy.count, uncompressed_size };
        Ok((proxy.inner, finished))
    }

    /// Finalize the encoder and recover the sink without writing anything further meaningful to
    /// it. `flate2`'s encoder has no native handle to leak, but this still gives writers a single
    /// symmetric teardown path to call on the error branch of a block-form write.
    pub fn dispose_on_failure(self) -> Result<W> {
        let proxy = self.encoder.finish()?;
        Ok(proxy.inner)
    }
}

/// Default heuristic parameters, normative per spec §4.9: buffer up to 128 KiB, pick deflated iff
/// the ratio of deflated bytes to buffered bytes is at most 0.75.
pub const HEURISTIC_THRESHOLD: usize = 128 * 1024;
pub const HEURISTIC_RATIO: f64 = 0.75;

/// Buffers incoming bytes (up to [`HEURISTIC_THRESHOLD`]) while deflating a parallel copy through
/// a private in-memory encoder, to decide stored-vs-deflated by actual compression ratio rather
/// than guessing from content type or extension.
pub struct HeuristicBuffer {
    buffered: Vec<u8>,
    probe: DeflateEncoder<Vec<u8>>,
}

impl Default for HeuristicBuffer {
    fn default() -> Self {
        Self { buffered: Vec::new(), probe: DeflateEncoder::new(Vec::new(), Compression::default()) }
    }
}

impl HeuristicBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes into the probe. Returns `true` once the threshold has been reached and a
    /// decision should be made.
    pub fn feed(&mut self, buf: &[u8]) -> Result<bool> {
        self.buffered.extend_from_slice(buf);
        self.probe.write_all(buf)?;
        Ok(self.buffered.len() >= HEURISTIC_THRESHOLD)
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Consume the buffer and decide which storage mode to commit to. Per spec §4.9, a buffer of
    /// zero bytes is treated as "not beneficial" and resolves to stored.
    pub fn decide(mut self) -> Result<(StorageMode, Vec<u8>)> {
        let deflated = self.probe.finish()?;
        let mode = if self.buffered.is_empty() {
            StorageMode::Stored
        } else {
            let ratio = deflated.len() as f64 / self.buffered.len() as f64;
            if ratio <= HEURISTIC_RATIO {
                StorageMode::Deflated
            } else {
                StorageMode::Stored
            }
        };
        Ok((mode, self.buffered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_writer_reports_identity_sizes() {
        let mut w = StoredWriter::new(Vec::new());
        w.write(b"hello world").unwrap();
        let (sink, finished) = w.finish().unwrap();
        assert_eq!(finished.compressed_size, 11);
        assert_eq!(finished.uncompressed_size, 11);
        assert_eq!(finished.crc32, crc32fast::hash(b"hello world"));
        assert_eq!(sink, b"hello world");
    }

    #[test]
    fn deflated_writer_tracks_both_sizes() {
        let data = vec![b'a'; 10_000];
        let mut w = DeflatedWriter::new(Vec::new());
        w.write(&data).unwrap();
        let (sink, finished) = w.finish().unwrap();
        assert_eq!(finished.uncompressed_size, 10_000);
        assert!(finished.compressed_size < 10_000);
        assert_eq!(finished.crc32, crc32fast::hash(&data));
        assert_eq!(sink.len(), finished.compressed_size as usize);
    }

    #[test]
    fn heuristic_picks_deflated_for_repetitive_data() {
        let mut hb = HeuristicBuffer::new();
        hb.feed(&vec![0u8; HEURISTIC_THRESHOLD]).unwrap();
        let (mode, buffered) = hb.decide().unwrap();
        assert_eq!(mode, StorageMode::Deflated);
        assert_eq!(buffered.len(), HEURISTIC_THRESHOLD);
    }

    #[test]
    fn heuristic_picks_stored_for_random_data() {
        // A cheap stand-in for "cryptographically random": an LCG stream, which deflate cannot
        // meaningfully shrink either.
        let mut state: u64 = 0x1234_5678_9abc_def0;
        let mut data = vec![0u8; HEURISTIC_THRESHOLD];
        for b in data.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *b = (state >> 56) as u8;
        }
        let mut hb = HeuristicBuffer::new();
        hb.feed(&data).unwrap();
        let (mode, _) = hb.decide().unwrap();
        assert_eq!(mode, StorageMode::Stored);
    }

    #[test]
    fn heuristic_empty_buffer_is_stored() {
        let hb = HeuristicBuffer::new();
        let (mode, buffered) = hb.decide().unwrap();
        assert_eq!(mode, StorageMode::Stored);
        assert!(buffered.is_empty());
    }
}
