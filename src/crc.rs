//! Incremental CRC32 accumulation, plus the GF(2) combine operation used to merge the CRCs of
//! two blobs without re-hashing their concatenation.

use crc32fast::Hasher;
use std::io::{self, Read};

/// Running CRC32 checksum over bytes seen so far.
///
/// Callers are expected to feed this in buffered chunks (tens of KiB); single-byte updates are
/// correct but go through the same `crc32fast::Hasher::update` path and gain nothing from being
/// batched here, so no internal buffering is attempted. Buffering, if wanted, is the write
/// buffer's job (see [`crate::sink::WriteBuffer`]).
#[derive(Default)]
pub struct Crc32Accumulator {
    hasher: Hasher,
}

impl Crc32Accumulator {
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Drain `reader` to EOF, folding every byte into this accumulator.
    pub fn from_stream<R: Read>(&mut self, mut reader: R) -> io::Result<u64> {
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.update(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    }

    /// Combine this CRC with the CRC of a second blob of length `other_len` whose CRC is
    /// `other_crc`, producing the CRC32 of the two blobs concatenated — without ever touching the
    /// bytes of either blob again.
    pub fn append(&mut self, other_crc: u32, other_len: u64) {
        let combined = combine(self.value(), other_crc, other_len);
        self.hasher = Hasher::new_with_initial(combined);
    }
}

/// Combine two CRC32 values the way zlib's `crc32_combine` does: treat CRC32 as a linear operator
/// over GF(2) and raise the "shift by one zero byte" matrix to the `len_b`-th power via square-
/// and-multiply, then apply the resulting matrix to `crc_a` and XOR in the correction term so the
/// trailing zero bits `crc_b` was computed over line up correctly.
///
/// This is the standard algorithm found in zlib/pigz/Python's `binascii.crc32_combine`; it exists
/// purely so two independently hashed chunks can be stitched into one CRC for free, in case the
/// caller builds an entry's bytes out of several buffers whose CRCs it already knows.
pub fn combine(crc_a: u32, crc_b: u32, len_b: u64) -> u32 {
    if len_b == 0 {
        return crc_a;
    }

    const GF2_DIM: usize = 32;

    let gf2_matrix_times = |mat: &[u32; GF2_DIM], mut vec: u32| -> u32 {
        let mut sum = 0u32;
        let mut i = 0;
        while vec != 0 {
            if vec & 1 != 0 {
                sum ^= mat[i];
            }
            vec >>= 1;
            i += 1;
        }
        sum
    };

    let gf2_matrix_square = |square: &mut [u32; GF2_DIM], mat: &[u32; GF2_DIM]| {
        for n in 0..GF2_DIM {
            square[n] = gf2_matrix_times(mat, mat[n]);
        }
    };

    // Operator for a single zero bit shifted in (CRC32 polynomial, reflected form).
    let mut odd = [0u32; GF2_DIM];
    odd[0] = 0xEDB8_8320;
    let mut row = 1u32;
    for n in 1..GF2_DIM {
        odd[n] = row;
        row <<= 1;
    }

    let mut even = [0u32; GF2_DIM];
    gf2_matrix_square(&mut even, &odd);
    let mut odd = odd;
    gf2_matrix_square(&mut odd, &even);

    let mut len = len_b;
    let mut crc1 = crc_a;
    let mut even = even;
    let mut odd = odd;

    loop {
        gf2_matrix_square(&mut even, &odd);
        if len & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len >>= 1;
        if len == 0 {
            break;
        }
        gf2_matrix_square(&mut odd, &even);
        if len & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len >>= 1;
        if len == 0 {
            break;
        }
    }

    crc1 ^ crc_b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_naive_concatenation() {
        let a = b"the quick brown fox ";
        let b = b"jumps over the lazy dog";

        let mut whole = Crc32Accumulator::new();
        whole.update(a);
        whole.update(b);
        let expected = whole.value();

        let crc_a = crc32fast::hash(a);
        let crc_b = crc32fast::hash(b);
        let combined = combine(crc_a, crc_b, b.len() as u64);

        assert_eq!(combined, expected);
    }

    #[test]
    fn combine_with_empty_second_blob_is_identity() {
        let crc_a = crc32fast::hash(b"anything");
        assert_eq!(combine(crc_a, crc32fast::hash(b""), 0), crc_a);
    }

    #[test]
    fn from_stream_matches_update() {
        let data = vec![7u8; 200_000];
        let mut by_update = Crc32Accumulator::new();
        by_update.update(&data);

        let mut by_stream = Crc32Accumulator::new();
        by_stream.from_stream(&data[..]).unwrap();

        assert_eq!(by_update.value(), by_stream.value());
    }
}
