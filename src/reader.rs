//! Central-directory-first archive reader: locates the EOCD (and Zip64 EOCD) from the tail,
//! parses the central directory with a single forward read each, and exposes per-entry
//! extractors. Also provides a straight-ahead fallback for archives with no usable trailer.
//!
//! Works against any `R: Read + Seek` and verifies the EOCD comment-length field against the
//! source's size rather than trusting the first signature match seen while scanning backwards —
//! a comment that happens to contain `PK\x05\x06` as data, rather than as the real record, would
//! otherwise be mistaken for it.

use crate::error::{Result, ZipError};
use crate::format::{
    DEFLATED, SIG_CENTRAL_DIR_HEADER, SIG_EOCD, SIG_LOCAL_FILE_HEADER, SIG_ZIP64_EOCD,
    SIG_ZIP64_EOCD_LOCATOR, STORED, ZIP64_EXTRA_TAG,
};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;

const EOCD_FIXED_SIZE: u64 = 22;
const EOCD_MAX_COMMENT: u64 = 0xFFFF;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const GPFLAG_ENCRYPTED: u16 = 1 << 0;
const GPFLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// One entry as recorded in the central directory (or, via [`read_straight_ahead`], recovered
/// from a local file header directly).
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub comment: Vec<u8>,
    pub extra: Vec<u8>,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub gp_flags: u16,
    pub external_attrs: u32,
    pub local_header_offset: u64,
    compressed_data_offset: Option<u64>,
}

impl Entry {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.gp_flags & GPFLAG_DATA_DESCRIPTOR != 0
    }

    /// The byte offset of this entry's compressed data, if the local header has already been read
    /// (see [`FileReader::ensure_local_header`] / [`read_straight_ahead`], which populate it as
    /// they go). Errors with [`ZipError::LocalHeaderPending`] otherwise.
    pub fn compressed_data_offset(&self) -> Result<u64> {
        self.compressed_data_offset.ok_or(ZipError::LocalHeaderPending)
    }
}

/// Either the raw stored bytes or an inflating DEFLATE stream over an entry's compressed region,
/// both bounded so a read can never run past the declared compressed size. CRC32 is not verified
/// here — see spec's read-side Non-goals.
pub enum Extractor<'a, R> {
    Stored(Take<&'a mut R>),
    Deflated(DeflateDecoder<Take<&'a mut R>>),
}

impl<'a, R: Read> Read for Extractor<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Extractor::Stored(r) => r.read(buf),
            Extractor::Deflated(r) => r.read(buf),
        }
    }
}

/// Parses an existing archive's central directory (forward-only seeks past that point) and hands
/// back entries plus on-demand extractors.
pub struct FileReader<R> {
    source: R,
    entries: Vec<Entry>,
}

impl FileReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> FileReader<R> {
    pub fn from_reader(mut source: R) -> Result<Self> {
        let entries = read_central_directory(&mut source)?;
        Ok(Self { source, entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Seek to entry `idx`'s local header, verify its signature, and compute
    /// `compressed_data_offset` from its filename/extras lengths. Cheap to call repeatedly —
    /// subsequent calls return the cached offset without touching the source again.
    pub fn ensure_local_header(&mut self, idx: usize) -> Result<u64> {
        if let Some(offset) = self.entries[idx].compressed_data_offset {
            return Ok(offset);
        }
        let local_header_offset = self.entries[idx].local_header_offset;
        self.source.seek(SeekFrom::Start(local_header_offset))?;

        let mut fixed = [0u8; 30];
        self.source.read_exact(&mut fixed)?;
        if u32::from_le_bytes(fixed[0..4].try_into().unwrap()) != SIG_LOCAL_FILE_HEADER {
            return Err(ZipError::InvalidFormat(format!(
                "no local file header signature at offset {local_header_offset}"
            )));
        }
        let filename_len = u16::from_le_bytes(fixed[26..28].try_into().unwrap()) as u64;
        let extra_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as u64;
        let offset = local_header_offset + 30 + filename_len + extra_len;
        self.entries[idx].compressed_data_offset = Some(offset);
        Ok(offset)
    }

    /// A reader bounded to entry `idx`'s compressed region, still compressed if the entry used
    /// deflate. Reads the local header first if it hasn't been read yet — callers that haven't
    /// called [`Self::ensure_local_header`] get [`ZipError::LocalHeaderPending`] only from
    /// [`Entry::compressed_data_offset`], never from this method, which always does the read
    /// itself.
    pub fn read_entry_raw(&mut self, idx: usize) -> Result<Take<&mut R>> {
        let offset = self.ensure_local_header(idx)?;
        self.source.seek(SeekFrom::Start(offset))?;
        Ok((&mut self.source).take(self.entries[idx].compressed_size))
    }

    /// A decoding extractor over entry `idx`: stored bytes verbatim, or an inflating DEFLATE
    /// reader. Errors with [`ZipError::UnsupportedCompression`] for anything else.
    pub fn extract(&mut self, idx: usize) -> Result<Extractor<'_, R>> {
        let method = self.entries[idx].compression_method;
        let raw = self.read_entry_raw(idx)?;
        match method {
            STORED => Ok(Extractor::Stored(raw)),
            DEFLATED => Ok(Extractor::Deflated(DeflateDecoder::new(raw))),
            other => Err(ZipError::UnsupportedCompression(other)),
        }
    }

    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        let mut out = Vec::with_capacity(self.entries[idx].uncompressed_size as usize);
        self.extract(idx)?.read_to_end(&mut out)?;
        Ok(out)
    }
}

fn read_central_directory<R: Read + Seek>(source: &mut R) -> Result<Vec<Entry>> {
    let size = source.seek(SeekFrom::End(0))?;
    let eocd_pos = find_eocd(source, size)?;

    source.seek(SeekFrom::Start(eocd_pos))?;
    let mut fixed = [0u8; 22];
    source.read_exact(&mut fixed)?;
    let disk_number = u16::from_le_bytes(fixed[4..6].try_into().unwrap());
    let disk_with_cd_start = u16::from_le_bytes(fixed[6..8].try_into().unwrap());
    if disk_number != 0 || disk_with_cd_start != 0 {
        return Err(ZipError::UnsupportedFeature("multi-disk archives".into()));
    }
    let entries_total_16 = u16::from_le_bytes(fixed[10..12].try_into().unwrap());
    let cd_size_32 = u32::from_le_bytes(fixed[12..16].try_into().unwrap());
    let cd_offset_32 = u32::from_le_bytes(fixed[16..20].try_into().unwrap());

    let (mut entry_count, mut cd_size, mut cd_offset) =
        (entries_total_16 as u64, cd_size_32 as u64, cd_offset_32 as u64);

    let looks_zip64 =
        entries_total_16 == 0xFFFF || cd_size_32 == 0xFFFF_FFFF || cd_offset_32 == 0xFFFF_FFFF;
    if looks_zip64 {
        if let Some((c, s, o)) = try_read_zip64_eocd(source, eocd_pos)? {
            entry_count = c;
            cd_size = s;
            cd_offset = o;
        }
    }

    source.seek(SeekFrom::Start(cd_offset))?;
    let mut buf = vec![0u8; cd_size as usize];
    source.read_exact(&mut buf)?;
    parse_central_directory_buffer(&buf, entry_count as usize)
}

/// Scan the trailing window for the EOCD signature, verifying at each candidate that its
/// comment-length field actually accounts for every remaining byte in the file — the rightmost
/// candidate that passes this check is the real EOCD. A comment that happens to contain the
/// 4-byte signature as data, rather than as the real record, fails the check and is skipped.
fn find_eocd<R: Read + Seek>(source: &mut R, size: u64) -> Result<u64> {
    let window_len = size.min(EOCD_FIXED_SIZE + EOCD_MAX_COMMENT);
    let window_start = size - window_len;
    source.seek(SeekFrom::Start(window_start))?;
    let mut buf = vec![0u8; window_len as usize];
    source.read_exact(&mut buf)?;

    let sig = SIG_EOCD.to_le_bytes();
    let mut best = None;
    let mut i = 0usize;
    while i + 22 <= buf.len() {
        if buf[i..i + 4] == sig {
            let comment_len = u16::from_le_bytes(buf[i + 20..i + 22].try_into().unwrap()) as u64;
            let candidate_pos = window_start + i as u64;
            if candidate_pos + 22 + comment_len == size {
                best = Some(candidate_pos);
            }
        }
        i += 1;
    }
    best.ok_or(ZipError::MissingEOCD)
}

/// The Zip64 EOCD locator sits at a fixed offset (20 bytes) immediately before the classic EOCD
/// record — no search needed, per spec §4.10 step 3.
fn try_read_zip64_eocd<R: Read + Seek>(
    source: &mut R,
    eocd_pos: u64,
) -> Result<Option<(u64, u64, u64)>> {
    if eocd_pos < ZIP64_LOCATOR_SIZE {
        return Ok(None);
    }
    let locator_pos = eocd_pos - ZIP64_LOCATOR_SIZE;
    source.seek(SeekFrom::Start(locator_pos))?;
    let mut locator = [0u8; 20];
    source.read_exact(&mut locator)?;
    if u32::from_le_bytes(locator[0..4].try_into().unwrap()) != SIG_ZIP64_EOCD_LOCATOR {
        return Ok(None);
    }
    let zip64_eocd_offset = u64::from_le_bytes(locator[8..16].try_into().unwrap());

    source.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let mut header = [0u8; 12]; // signature (4) + record size (8)
    source.read_exact(&mut header)?;
    if u32::from_le_bytes(header[0..4].try_into().unwrap()) != SIG_ZIP64_EOCD {
        return Err(ZipError::InvalidFormat(
            "zip64 EOCD locator pointed at the wrong signature".into(),
        ));
    }

    // version-made-by(2) + version-needed(2) + disk-number(4) + disk-with-cd-start(4)
    // + entries-on-disk(8) + total-entries(8) + cd-size(8) + cd-offset(8)
    let mut rest = [0u8; 12 + 8 + 8 + 8 + 8];
    source.read_exact(&mut rest)?;
    let total_entries = u64::from_le_bytes(rest[20..28].try_into().unwrap());
    let cd_size = u64::from_le_bytes(rest[28..36].try_into().unwrap());
    let cd_offset = u64::from_le_bytes(rest[36..44].try_into().unwrap());
    Ok(Some((total_entries, cd_size, cd_offset)))
}

/// Parse central-directory entries from an in-memory buffer — pure byte slicing once the
/// directory itself has been read, no further I/O.
fn parse_central_directory_buffer(buf: &[u8], entry_count: usize) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(entry_count);
    let mut pos = 0usize;
    for _ in 0..entry_count {
        if pos + 46 > buf.len() {
            break;
        }
        if u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) != SIG_CENTRAL_DIR_HEADER {
            break;
        }
        let gp_flags = u16::from_le_bytes(buf[pos + 8..pos + 10].try_into().unwrap());
        if gp_flags & GPFLAG_ENCRYPTED != 0 {
            return Err(ZipError::UnsupportedFeature("encrypted entries".into()));
        }
        let compression_method = u16::from_le_bytes(buf[pos + 10..pos + 12].try_into().unwrap());
        let crc32 = u32::from_le_bytes(buf[pos + 16..pos + 20].try_into().unwrap());
        let compressed_size_32 = u32::from_le_bytes(buf[pos + 20..pos + 24].try_into().unwrap());
        let uncompressed_size_32 = u32::from_le_bytes(buf[pos + 24..pos + 28].try_into().unwrap());
        let filename_len = u16::from_le_bytes(buf[pos + 28..pos + 30].try_into().unwrap()) as usize;
        let extra_len = u16::from_le_bytes(buf[pos + 30..pos + 32].try_into().unwrap()) as usize;
        let comment_len = u16::from_le_bytes(buf[pos + 32..pos + 34].try_into().unwrap()) as usize;
        let external_attrs = u32::from_le_bytes(buf[pos + 38..pos + 42].try_into().unwrap());
        let local_header_offset_32 = u32::from_le_bytes(buf[pos + 42..pos + 46].try_into().unwrap());

        let mut p = pos + 46;
        if p + filename_len > buf.len() {
            break;
        }
        let name = String::from_utf8_lossy(&buf[p..p + filename_len]).into_owned();
        p += filename_len;
        if p + extra_len > buf.len() {
            break;
        }
        let extra = buf[p..p + extra_len].to_vec();
        p += extra_len;
        if p + comment_len > buf.len() {
            break;
        }
        let comment = buf[p..p + comment_len].to_vec();
        p += comment_len;

        let mut uncompressed_size = uncompressed_size_32 as u64;
        let mut compressed_size = compressed_size_32 as u64;
        let mut local_header_offset = local_header_offset_32 as u64;

        let mut ei = 0usize;
        while ei + 4 <= extra.len() {
            let tag = u16::from_le_bytes(extra[ei..ei + 2].try_into().unwrap());
            let extra_size = u16::from_le_bytes(extra[ei + 2..ei + 4].try_into().unwrap()) as usize;
            let data_start = ei + 4;
            if data_start + extra_size > extra.len() {
                break;
            }
            if tag == ZIP64_EXTRA_TAG {
                let data = &extra[data_start..data_start + extra_size];
                let mut c = 0usize;
                if uncompressed_size_32 == 0xFFFF_FFFF && c + 8 <= data.len() {
                    uncompressed_size = u64::from_le_bytes(data[c..c + 8].try_into().unwrap());
                    c += 8;
                }
                if compressed_size_32 == 0xFFFF_FFFF && c + 8 <= data.len() {
                    compressed_size = u64::from_le_bytes(data[c..c + 8].try_into().unwrap());
                    c += 8;
                }
                if local_header_offset_32 == 0xFFFF_FFFF && c + 8 <= data.len() {
                    local_header_offset = u64::from_le_bytes(data[c..c + 8].try_into().unwrap());
                }
            }
            ei = data_start + extra_size;
        }

        entries.push(Entry {
            name,
            comment,
            extra,
            crc32,
            compressed_size,
            uncompressed_size,
            compression_method,
            gp_flags,
            external_attrs,
            local_header_offset,
            compressed_data_offset: None,
        });
        pos = p;
    }
    Ok(entries)
}

/// Best-effort parser for archives with no usable central directory (e.g. truncated mid-write).
/// Walks local file headers from offset 0, trusting their declared sizes to skip each body.
/// Entries written with a data descriptor (sizes unknown at header time) can't be recovered this
/// way and end the scan at the first one encountered.
pub fn read_straight_ahead<R: Read + Seek>(source: &mut R) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = source.seek(SeekFrom::Start(0))?;

    loop {
        let mut sig_buf = [0u8; 4];
        match source.read_exact(&mut sig_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        if u32::from_le_bytes(sig_buf) != SIG_LOCAL_FILE_HEADER {
            break;
        }

        let mut fixed = [0u8; 26];
        source.read_exact(&mut fixed)?;
        let gp_flags = u16::from_le_bytes(fixed[2..4].try_into().unwrap());
        let compression_method = u16::from_le_bytes(fixed[4..6].try_into().unwrap());
        let crc32 = u32::from_le_bytes(fixed[10..14].try_into().unwrap());
        let compressed_size = u32::from_le_bytes(fixed[14..18].try_into().unwrap()) as u64;
        let uncompressed_size = u32::from_le_bytes(fixed[18..22].try_into().unwrap()) as u64;
        let filename_len = u16::from_le_bytes(fixed[22..24].try_into().unwrap()) as usize;
        let extra_len = u16::from_le_bytes(fixed[24..26].try_into().unwrap()) as usize;

        if gp_flags & GPFLAG_DATA_DESCRIPTOR != 0 {
            break;
        }

        let mut name_buf = vec![0u8; filename_len];
        source.read_exact(&mut name_buf)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();
        source.seek(SeekFrom::Current(extra_len as i64))?;

        let local_header_offset = pos;
        let compressed_data_offset = local_header_offset + 30 + filename_len as u64 + extra_len as u64;

        entries.push(Entry {
            name,
            comment: Vec::new(),
            extra: Vec::new(),
            crc32,
            compressed_size,
            uncompressed_size,
            compression_method,
            gp_flags,
            external_attrs: 0,
            local_header_offset,
            compressed_data_offset: Some(compressed_data_offset),
        });

        source.seek(SeekFrom::Current(compressed_size as i64))?;
        pos = compressed_data_offset + compressed_size;
    }

    Ok(entries)
}
