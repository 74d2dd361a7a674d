//! Drives the same entry-addition surface as [`crate::streamer::Streamer`] against a sink that
//! discards bytes but still counts them, so a caller can learn the exact byte size a future
//! archive would have before committing to write it anywhere.
//!
//! Built by reusing [`crate::sink::DiscardingSink`]'s "wrap and count" shape, the same one the
//! streamer's own [`crate::sink::CountingWriter`] uses, against the entry-metadata-only subset of
//! the streamer's API: sizes and CRCs must already be known, since there's no real body to stream
//! through a compressor.

use crate::error::Result;
use crate::sink::DiscardingSink;
use crate::streamer::Streamer;

/// Computes the exact final byte size of an archive built from a script of entry additions,
/// without ever holding entry bodies in memory or touching a real sink.
///
/// ```
/// use streamzip::estimator::SizeEstimator;
///
/// let mut est = SizeEstimator::new();
/// est.add_stored_entry("a.txt", 3, 0x352441c2, 0, None).unwrap();
/// est.add_stored_entry("b.txt", 5, 0x3610a686, 0, None).unwrap();
/// let predicted = est.finish().unwrap();
/// assert!(predicted > 0);
/// ```
pub struct SizeEstimator {
    inner: Streamer<DiscardingSink>,
}

impl Default for SizeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeEstimator {
    pub fn new() -> Self {
        Self { inner: Streamer::new(DiscardingSink::new()) }
    }

    pub fn add_stored_entry(
        &mut self,
        name: &str,
        size: u64,
        crc32: u32,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<u64> {
        self.inner.add_stored_entry(name, size, crc32, mtime_unix, unix_perms, false)?;
        self.inner.simulate_write(size)
    }

    pub fn add_deflated_entry(
        &mut self,
        name: &str,
        compressed_size: u64,
        uncompressed_size: u64,
        crc32: u32,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<u64> {
        self.inner.add_deflated_entry(
            name,
            compressed_size,
            uncompressed_size,
            crc32,
            mtime_unix,
            unix_perms,
            false,
        )?;
        self.inner.simulate_write(compressed_size)
    }

    pub fn add_empty_directory(&mut self, name: &str, mtime_unix: i64, unix_perms: Option<u32>) -> Result<u64> {
        self.inner.add_empty_directory(name, mtime_unix, unix_perms)
    }

    /// Finalize the simulated archive and return the total byte size it would occupy.
    pub fn finish(&mut self) -> Result<u64> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::Streamer as RealStreamer;

    #[test]
    fn matches_actual_bytes_written() {
        let mut est = SizeEstimator::new();
        est.add_stored_entry("first-file.bin", 20 * 1024, 0x1234_5678, 0, None).unwrap();
        est.add_deflated_entry("second-file.bin", 900, 131_072, 0x9abc_def0, 0, None).unwrap();
        let predicted = est.finish().unwrap();

        let mut real = RealStreamer::new(Vec::new());
        real.add_stored_entry("first-file.bin", 20 * 1024, 0x1234_5678, 0, None, false).unwrap();
        real.simulate_write(20 * 1024).unwrap();
        real.add_deflated_entry("second-file.bin", 900, 131_072, 0x9abc_def0, 0, None, false).unwrap();
        real.simulate_write(900).unwrap();
        let actual = real.close().unwrap();

        assert_eq!(predicted, actual);
    }

    #[test]
    fn empty_estimate_is_22_bytes() {
        let mut est = SizeEstimator::new();
        assert_eq!(est.finish().unwrap(), 22);
    }
}
