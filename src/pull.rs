//! Turns the push-based [`crate::streamer::Streamer`] into a lazy byte-chunk iterator suitable
//! for use as an HTTP response body — a caller hands in a producer closure that drives a
//! `Streamer`, and gets back an `Iterator<Item = io::Result<Vec<u8>>>` that yields only non-empty
//! chunks as they become available.
//!
//! Bridges a push producer to a pull consumer with a thread and a bounded channel, rather than an
//! async task and channel, since this crate's core has no async runtime dependency.

use crate::error::ZipError;
use crate::sink::{WriteBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::streamer::Streamer;
use std::io::{self, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

/// Recommended HTTP headers for streaming a ZIP response body: these disable the buffering and
/// compression middleware known to break a true streaming response (re-compressing an already
/// compressed body, or buffering the whole thing before the first byte reaches the client).
/// `Last-Modified` is intentionally left for the caller to fill in with the current time — this
/// crate has no business picking a clock source for an HTTP header.
pub const RECOMMENDED_STREAMING_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "application/zip"),
    ("Content-Encoding", "identity"),
    ("X-Accel-Buffering", "no"),
];

struct ChannelWriter {
    tx: SyncSender<io::Result<Vec<u8>>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pull iterator was dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn to_io_error(e: ZipError) -> io::Error {
    match e {
        ZipError::Io(io_err) => io_err,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// A lazy iterator of archive byte chunks, backed by a producer thread driving a `Streamer`
/// against a bounded channel. Chunks are independently owned `Vec<u8>`s — no backing buffer is
/// shared across iterations, so callers may retain them without copying.
pub struct PullReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PullReader {
    /// Spawn a producer thread that builds an archive via `producer`, writing through a
    /// coalescing buffer (default 64 KiB, per spec §4.7) into a bounded channel of size
    /// `channel_capacity`. The channel's boundedness is what applies backpressure: once it fills,
    /// the producer thread blocks on its next write until the consumer calls `next()` again.
    pub fn new<F>(channel_capacity: usize, producer: F) -> Self
    where
        F: FnOnce(&mut Streamer<WriteBuffer<ChannelWriter>>) -> crate::error::Result<()> + Send + 'static,
    {
        let (tx, rx) = sync_channel(channel_capacity.max(1));

        let handle = thread::spawn(move || {
            let sink = WriteBuffer::with_capacity(ChannelWriter { tx: tx.clone() }, DEFAULT_BUFFER_CAPACITY);
            let mut streamer = Streamer::new(sink);

            let result = producer(&mut streamer).and_then(|()| streamer.close().map(|_| ()));
            match result {
                Ok(()) => {
                    if let Ok(mut wb) = streamer.into_sink() {
                        let _ = wb.flush();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(to_io_error(e)));
                }
            }
        });

        Self { rx, handle: Some(handle) }
    }
}

impl Iterator for PullReader {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(chunk) => Some(chunk),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                None
            }
        }
    }
}
