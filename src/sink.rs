//! Sink adapters: a position-tracking wrapper around any [`Write`], and a small write-coalescing
//! buffer placed in front of it.

use std::io::{self, Write};

/// Wraps any append-only byte sink and keeps a running tally of how many bytes have passed
/// through it, so the streamer never needs the sink itself to support `seek`/`tell`.
///
/// Works against any `W: Write`; CRC tracking is a separate concern, handled by
/// [`crate::crc::Crc32Accumulator`] layered on top where needed.
pub struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Advance the position counter by `n` without writing anything, for callers that write
    /// entry body bytes directly to the underlying sink out-of-band (e.g. via `sendfile`).
    pub fn advance_by(&mut self, n: u64) {
        self.position += n;
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Default coalescing capacity for [`WriteBuffer`], matching spec §4.7.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Coalesces small writes into a configured-size internal buffer before forwarding them, to cut
/// down on syscalls when the underlying sink is a socket or pipe. Writes larger than the
/// remaining buffer capacity are not buffered at all — the internal buffer is flushed first, then
/// the oversized write goes straight through.
pub struct WriteBuffer<W: Write> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
}

impl<W: Write> WriteBuffer<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(inner: W, capacity: usize) -> Self {
        Self { inner, buf: Vec::with_capacity(capacity), capacity }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush_internal()?;
        Ok(self.inner)
    }

    fn flush_internal(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.buf.len() + buf.len() > self.capacity {
            self.flush_internal()?;
            if buf.len() > self.capacity {
                self.inner.write_all(buf)?;
                return Ok(buf.len());
            }
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_internal()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for WriteBuffer<W> {
    fn drop(&mut self) {
        let _ = self.flush_internal();
    }
}

/// A sink that discards every byte written but still counts them, used by the size estimator to
/// compute exact future archive sizes without writing entry bodies.
#[derive(Default)]
pub struct DiscardingSink {
    written: u64,
}

impl DiscardingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for DiscardingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
