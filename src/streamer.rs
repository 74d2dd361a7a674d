//! The orchestrator: sequences local file headers, entry bodies, data descriptors, the central
//! directory and the EOCD against one append-only sink, while tracking the byte offset the sink
//! is at so every entry's `local_header_offset` is correct without ever seeking.
//!
//! Works against any `W: Write`, built around an explicit state enum rather than an implicit
//! `Option<CurrentEntry>`, with rollback/filler accounting and a `PathSet` gate layered on top.

use crate::entry_writer::{DeflatedWriter, FinishedEntry, HeuristicBuffer, StorageMode, StoredWriter};
use crate::error::{Result, ZipError};
use crate::format::{
    self, CentralDirectoryFileHeader, DataDescriptor, LocalFileHeader, DEFAULT_DIR_PERMS,
    DEFAULT_FILE_PERMS, DEFLATED, MAX_ENTRIES_BEFORE_ZIP64, STORED, ZIP64_THRESHOLD,
};
use crate::pathset::{sanitize_backslashes, PathSet};
use crate::sink::CountingWriter;
use std::io::{self, Write};

/// The Streamer's lifecycle phase. `LocalHeader` is not independently observable through this
/// implementation: opening an entry writes its header and enters `EntryBody` within the same
/// call, since every header write here is a single synchronous operation with no suspension
/// point in between (there is nothing a caller could observe between the two).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    LocalHeader,
    EntryBody,
    DataDescriptors,
    CentralDirectory,
    Closed,
}

/// Constructor options, per spec §6's integration interface.
pub struct StreamerOptions {
    /// When a file path is added twice, generate `name (1).ext`, `name (2).ext`, ... instead of
    /// failing with a path conflict.
    pub auto_rename_duplicate_filenames: bool,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self { auto_rename_duplicate_filenames: false }
    }
}

struct EntryRecord {
    filename: Vec<u8>,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    storage_mode: u16,
    mtime_unix: i64,
    use_data_descriptor: bool,
    local_header_offset: u64,
    bytes_used_for_local_header: u64,
    bytes_used_for_data_descriptor: u64,
    unix_perms: Option<u32>,
    is_directory: bool,
}

impl EntryRecord {
    fn total_bytes_used(&self) -> u64 {
        self.bytes_used_for_local_header + self.compressed_size + self.bytes_used_for_data_descriptor
    }
}

/// A placeholder occupying the byte span a rolled-back entry already consumed on the wire.
/// Never emitted into the central directory; it exists purely so later entries' offsets stay
/// correct.
struct Filler {
    total_bytes_used: u64,
}

enum Slot {
    Entry(EntryRecord),
    Filler(Filler),
}

/// The writer actively occupying the sink: either nothing, a stored/deflated body pipeline, or
/// the heuristic writer's buffering phase. Once the heuristic writer commits, it becomes a plain
/// `Stored`/`Deflated` entry like any other — there is no separate "committed heuristic" variant.
enum CurrentEntry<W: Write> {
    None,
    Stored(StoredWriter<CountingWriter<W>>),
    Deflated(DeflatedWriter<CountingWriter<W>>),
    HeuristicBuffering {
        buffer: HeuristicBuffer,
        sink: CountingWriter<W>,
        name: String,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    },
}

/// Orchestrates one ZIP archive written to one sink. See module docs.
pub struct Streamer<W: Write> {
    /// `Some` whenever no entry body writer currently owns the sink; `None` while one does.
    sink: Option<CountingWriter<W>>,
    current: CurrentEntry<W>,
    path_set: PathSet,
    slots: Vec<Slot>,
    state: State,
    /// Sink offset immediately before the most recently opened entry's local header.
    snapshot_offset: u64,
    options: StreamerOptions,
}

/// A handle to the entry body currently open on a [`Streamer`]. Accepts bytes, tracks CRC32 and
/// size, and on `finish()` writes the data descriptor. Grounded on spec §4.8/§9: "a function
/// taking a closure `F(&mut Writable) -> Result<()>`"; in Rust this is a thin wrapper around
/// `&mut Streamer<W>` — all state lives on the Streamer itself, so no self-referential borrow is
/// needed to also reach the path set, entry list, or sink position.
pub struct Writable<'a, W: Write> {
    streamer: &'a mut Streamer<W>,
}

impl<'a, W: Write> Writable<'a, W> {
    /// Write more body bytes. For the heuristic writer, this may cross the 128 KiB threshold and
    /// trigger the stored-vs-deflated decision + local header write mid-call.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.streamer.write_current(buf)
    }

    /// Flush the body pipeline and write the data descriptor, returning the sink's offset after it.
    pub fn finish(self) -> Result<u64> {
        self.streamer.finish_current()
    }

    /// Finalize the encoder (if any) and release it without writing anything further meaningful
    /// to the sink, recovering the underlying sink so the Streamer can keep going after
    /// `rollback()`. Safe to call even if the writer never received a byte.
    pub fn dispose_on_failure(&mut self) {
        if let Err(e) = self.streamer.dispose_current() {
            log::warn!("dispose_on_failure could not recover the sink cleanly: {e}");
        }
    }
}

impl<'a, W: Write> Write for Writable<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Writable::write(self, buf).map_err(to_io_error)?;
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

impl<W: Write> Streamer<W> {
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, StreamerOptions::default())
    }

    pub fn with_options(sink: W, options: StreamerOptions) -> Self {
        Streamer {
            sink: Some(CountingWriter::new(sink)),
            current: CurrentEntry::None,
            path_set: PathSet::new(),
            slots: Vec::new(),
            state: State::Initial,
            snapshot_offset: 0,
            options,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Current sink offset. Only valid while no entry writer is open (the sink is "idle") — every
    /// call site in this module only reaches it at such points.
    pub fn tell(&self) -> u64 {
        self.sink.as_ref().expect("tell() called while an entry writer owns the sink").tell()
    }

    fn require_open_state(&self) -> Result<()> {
        match self.state {
            State::CentralDirectory | State::Closed => {
                Err(ZipError::InvalidOutput("the archive is already finalizing or closed".into()))
            }
            _ => Ok(()),
        }
    }

    fn require_idle(&self) -> Result<()> {
        if self.sink.is_none() {
            return Err(ZipError::InvalidOutput(
                "an entry writer is already open; only one may be open at a time".into(),
            ));
        }
        Ok(())
    }

    /// Checks the entry most recently opened with a size declared upfront (no data descriptor,
    /// stored mode) actually received that many body bytes by `current_offset`. Entries written
    /// through the streaming `Writable` API always use a data descriptor and their sizes are
    /// computed from what was actually written, so they're never subject to this check — it only
    /// catches a caller of `add_stored_entry`/`simulate_write` whose declared size and advanced
    /// byte count disagree.
    fn validate_previous_stored_entry_size(&self, current_offset: u64) -> Result<()> {
        if let Some(Slot::Entry(prev)) = self.slots.last() {
            if prev.storage_mode == STORED && !prev.use_data_descriptor {
                let body_start = prev.local_header_offset + prev.bytes_used_for_local_header;
                let actual = current_offset.saturating_sub(body_start);
                let declared = prev.uncompressed_size;
                if actual != declared {
                    return Err(ZipError::EntryBodySizeMismatch { declared, actual });
                }
            }
        }
        Ok(())
    }

    /// Reserve the path, write the local file header, and push the new entry record. Shared by
    /// every entry-adding operation; `use_dd` callers pass zeroed crc/sizes.
    fn open_header(
        &mut self,
        raw_name: &str,
        is_directory: bool,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        storage_mode: u16,
        use_dd: bool,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> Result<String> {
        self.require_open_state()?;
        self.require_idle()?;
        if storage_mode != STORED && storage_mode != DEFLATED {
            return Err(ZipError::UnknownMode(storage_mode));
        }
        self.validate_previous_stored_entry_size(self.tell())?;

        let mut name = sanitize_backslashes(raw_name);
        if is_directory && !name.ends_with('/') {
            name.push('/');
        }
        if name.len() > u16::MAX as usize {
            let len = name.len();
            return Err(ZipError::Overflow { filename: name, len });
        }
        if !is_directory && self.options.auto_rename_duplicate_filenames && self.path_set.contains(&name) {
            name = self.path_set.uniquify(&name);
        }
        if is_directory {
            self.path_set.add_directory_path(&name)?;
        } else {
            self.path_set.add_file_path(&name)?;
        }

        let snapshot_offset = self.tell();
        let header = LocalFileHeader {
            storage_mode,
            use_data_descriptor: use_dd,
            crc32,
            compressed_size,
            uncompressed_size,
            mtime_unix,
            filename: name.as_bytes(),
        };
        let bytes_used = header.write_to(self.sink.as_mut().unwrap())?;
        log::trace!("wrote local header for {name:?} at offset {snapshot_offset} ({bytes_used} bytes)");

        self.slots.push(Slot::Entry(EntryRecord {
            filename: name.clone().into_bytes(),
            crc32,
            compressed_size,
            uncompressed_size,
            storage_mode,
            mtime_unix,
            use_data_descriptor: use_dd,
            local_header_offset: snapshot_offset,
            bytes_used_for_local_header: bytes_used,
            bytes_used_for_data_descriptor: 0,
            unix_perms,
            is_directory,
        }));
        self.snapshot_offset = snapshot_offset;
        self.state = State::EntryBody;
        Ok(name)
    }

    /// Add a stored entry whose size and CRC32 are already known (or will be supplied out-of-band
    /// via `simulate_write`/a data descriptor). Returns the sink offset after the header.
    pub fn add_stored_entry(
        &mut self,
        name: &str,
        size: u64,
        crc32: u32,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        use_data_descriptor: bool,
    ) -> Result<u64> {
        let (c, u, crc) = if use_data_descriptor { (0, 0, 0) } else { (size, size, crc32) };
        self.open_header(name, false, mtime_unix, unix_perms, STORED, use_data_descriptor, crc, c, u)?;
        Ok(self.tell())
    }

    /// Add a deflated entry whose compressed/uncompressed sizes and CRC32 are already known.
    pub fn add_deflated_entry(
        &mut self,
        name: &str,
        compressed_size: u64,
        uncompressed_size: u64,
        crc32: u32,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        use_data_descriptor: bool,
    ) -> Result<u64> {
        let (c, u, crc) = if use_data_descriptor {
            (0, 0, 0)
        } else {
            (compressed_size, uncompressed_size, crc32)
        };
        self.open_header(name, false, mtime_unix, unix_perms, DEFLATED, use_data_descriptor, crc, c, u)?;
        Ok(self.tell())
    }

    /// Add a zero-length directory entry, suffixing `name` with `/` if it lacks one.
    pub fn add_empty_directory(&mut self, name: &str, mtime_unix: i64, unix_perms: Option<u32>) -> Result<u64> {
        self.open_header(name, true, mtime_unix, unix_perms, STORED, false, 0, 0, 0)?;
        Ok(self.tell())
    }

    /// Advance the sink's position counter by `n` without writing, for bodies delivered to the
    /// underlying target out-of-band (e.g. `sendfile`).
    pub fn simulate_write(&mut self, n: u64) -> Result<u64> {
        self.require_idle()?;
        self.sink.as_mut().unwrap().advance_by(n);
        Ok(self.tell())
    }

    pub fn write_stored_file(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<Writable<'_, W>> {
        self.open_header(name, false, mtime_unix, unix_perms, STORED, true, 0, 0, 0)?;
        let sink = self.sink.take().expect("sink idle immediately after open_header");
        self.current = CurrentEntry::Stored(StoredWriter::new(sink));
        Ok(Writable { streamer: self })
    }

    pub fn write_deflated_file(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<Writable<'_, W>> {
        self.open_header(name, false, mtime_unix, unix_perms, DEFLATED, true, 0, 0, 0)?;
        let sink = self.sink.take().expect("sink idle immediately after open_header");
        self.current = CurrentEntry::Deflated(DeflatedWriter::new(sink));
        Ok(Writable { streamer: self })
    }

    /// Buffer up to 128 KiB while probing compression, then commit to stored or deflated once the
    /// threshold is crossed (or at `finish()` if it never is). See [`crate::entry_writer`].
    pub fn write_file(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<Writable<'_, W>> {
        self.require_open_state()?;
        self.require_idle()?;
        let name = sanitize_backslashes(name);
        let sink = self.sink.take().expect("sink idle after require_idle");
        self.current = CurrentEntry::HeuristicBuffering {
            buffer: HeuristicBuffer::new(),
            sink,
            name,
            mtime_unix,
            unix_perms,
        };
        self.state = State::EntryBody;
        Ok(Writable { streamer: self })
    }

    fn write_current(&mut self, buf: &[u8]) -> Result<()> {
        let current = std::mem::replace(&mut self.current, CurrentEntry::None);
        let (next, result) = self.advance_current(current, buf);
        self.current = next;
        result
    }

    fn advance_current(&mut self, current: CurrentEntry<W>, buf: &[u8]) -> (CurrentEntry<W>, Result<()>) {
        match current {
            CurrentEntry::None => {
                (CurrentEntry::None, Err(ZipError::InvalidOutput("no entry is open".into())))
            }
            CurrentEntry::Stored(mut w) => {
                let r = w.write(buf);
                (CurrentEntry::Stored(w), r)
            }
            CurrentEntry::Deflated(mut w) => {
                let r = w.write(buf);
                (CurrentEntry::Deflated(w), r)
            }
            CurrentEntry::HeuristicBuffering { mut buffer, sink, name, mtime_unix, unix_perms } => {
                match buffer.feed(buf) {
                    Ok(crossed) if crossed => {
                        match self.commit_heuristic(buffer, sink, &name, mtime_unix, unix_perms) {
                            Ok(committed) => (committed, Ok(())),
                            Err(e) => (CurrentEntry::None, Err(e)),
                        }
                    }
                    Ok(_) => (
                        CurrentEntry::HeuristicBuffering { buffer, sink, name, mtime_unix, unix_perms },
                        Ok(()),
                    ),
                    Err(e) => (
                        CurrentEntry::HeuristicBuffering { buffer, sink, name, mtime_unix, unix_perms },
                        Err(e),
                    ),
                }
            }
        }
    }

    fn commit_heuristic(
        &mut self,
        buffer: HeuristicBuffer,
        sink: CountingWriter<W>,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
    ) -> Result<CurrentEntry<W>> {
        let (mode, buffered) = buffer.decide()?;
        self.sink = Some(sink);
        // `open_header` re-sanitizes, but the name was already sanitized in `write_file`; this is
        // a harmless no-op pass, not a second, different transformation.
        match mode {
            StorageMode::Stored => {
                self.open_header(name, false, mtime_unix, unix_perms, STORED, true, 0, 0, 0)?;
                let sink = self.sink.take().unwrap();
                let mut w = StoredWriter::new(sink);
                w.write(&buffered)?;
                log::debug!("heuristic writer committed {name:?} to stored ({} bytes buffered)", buffered.len());
                Ok(CurrentEntry::Stored(w))
            }
            StorageMode::Deflated => {
                self.open_header(name, false, mtime_unix, unix_perms, DEFLATED, true, 0, 0, 0)?;
                let sink = self.sink.take().unwrap();
                let mut w = DeflatedWriter::new(sink);
                w.write(&buffered)?;
                log::debug!("heuristic writer committed {name:?} to deflated ({} bytes buffered)", buffered.len());
                Ok(CurrentEntry::Deflated(w))
            }
        }
    }

    fn finish_current(&mut self) -> Result<u64> {
        let current = std::mem::replace(&mut self.current, CurrentEntry::None);
        match current {
            CurrentEntry::None => Err(ZipError::InvalidOutput("no entry is open".into())),
            CurrentEntry::Stored(w) => {
                let (sink, finished) = w.finish()?;
                self.sink = Some(sink);
                self.complete_entry(finished)
            }
            CurrentEntry::Deflated(w) => {
                let (sink, finished) = w.finish()?;
                self.sink = Some(sink);
                self.complete_entry(finished)
            }
            CurrentEntry::HeuristicBuffering { buffer, sink, name, mtime_unix, unix_perms } => {
                let (mode, buffered) = buffer.decide()?;
                self.sink = Some(sink);
                let finished = match mode {
                    StorageMode::Stored => {
                        self.open_header(&name, false, mtime_unix, unix_perms, STORED, true, 0, 0, 0)?;
                        let sink = self.sink.take().unwrap();
                        let mut w = StoredWriter::new(sink);
                        w.write(&buffered)?;
                        let (sink, finished) = w.finish()?;
                        self.sink = Some(sink);
                        finished
                    }
                    StorageMode::Deflated => {
                        self.open_header(&name, false, mtime_unix, unix_perms, DEFLATED, true, 0, 0, 0)?;
                        let sink = self.sink.take().unwrap();
                        let mut w = DeflatedWriter::new(sink);
                        w.write(&buffered)?;
                        let (sink, finished) = w.finish()?;
                        self.sink = Some(sink);
                        finished
                    }
                };
                self.complete_entry(finished)
            }
        }
    }

    fn complete_entry(&mut self, finished: FinishedEntry) -> Result<u64> {
        self.update_last_entry_and_write_data_descriptor(
            finished.crc32,
            finished.compressed_size,
            finished.uncompressed_size,
        )
    }

    /// Patch the last entry's recorded crc/sizes and emit its data descriptor.
    pub fn update_last_entry_and_write_data_descriptor(
        &mut self,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> Result<u64> {
        self.require_idle()?;
        let dd = DataDescriptor { crc32, compressed_size, uncompressed_size };
        let bytes_used = dd.write_to(self.sink.as_mut().unwrap())?;
        if let Some(Slot::Entry(e)) = self.slots.last_mut() {
            e.crc32 = crc32;
            e.compressed_size = compressed_size;
            e.uncompressed_size = uncompressed_size;
            e.bytes_used_for_data_descriptor = bytes_used;
        }
        self.state = State::DataDescriptors;
        Ok(self.tell())
    }

    fn dispose_current(&mut self) -> Result<()> {
        let current = std::mem::replace(&mut self.current, CurrentEntry::None);
        match current {
            CurrentEntry::None => Ok(()),
            CurrentEntry::Stored(w) => {
                self.sink = Some(w.dispose_on_failure());
                Ok(())
            }
            CurrentEntry::Deflated(w) => {
                self.sink = Some(w.dispose_on_failure()?);
                Ok(())
            }
            CurrentEntry::HeuristicBuffering { sink, .. } => {
                self.sink = Some(sink);
                Ok(())
            }
        }
    }

    /// Discard the last entry added. Removes it from the entry list, rebuilds the path set from
    /// the surviving entries, and pushes a [`Filler`] spanning the bytes already on the wire for
    /// it. No bytes are rewound.
    pub fn rollback(&mut self) -> Result<()> {
        // The heuristic writer defers its local header (and slot) until it commits to stored or
        // deflated (see `commit_heuristic`), so an attempt that fails while still buffering never
        // wrote anything and has no slot of its own to discard; popping here would instead discard
        // whatever entry happened to precede it.
        let discarding_uncommitted_heuristic =
            matches!(self.current, CurrentEntry::HeuristicBuffering { .. });

        self.dispose_current()?;

        if discarding_uncommitted_heuristic {
            self.state = State::EntryBody;
            log::debug!("rolled back a heuristic entry that never committed; nothing to discard");
            return Ok(());
        }

        if !matches!(self.slots.last(), Some(Slot::Entry(_))) {
            return Err(ZipError::InvalidOutput("rollback() called with no entry to discard".into()));
        }
        self.slots.pop();

        self.path_set.clear();
        for slot in &self.slots {
            if let Slot::Entry(e) = slot {
                let name = String::from_utf8_lossy(&e.filename).into_owned();
                let _ = if e.is_directory {
                    self.path_set.add_directory_path(&name)
                } else {
                    self.path_set.add_file_path(&name)
                };
            }
        }

        let current_offset = self.tell();
        let filler_size = current_offset.saturating_sub(self.snapshot_offset);
        self.slots.push(Slot::Filler(Filler { total_bytes_used: filler_size }));
        self.state = State::EntryBody;
        log::debug!("rolled back last entry; filler of {filler_size} bytes recorded");
        Ok(())
    }

    /// Run `f` against a freshly opened stored entry, rolling the entry back if `f` or the
    /// writer's own close fails.
    pub fn write_stored_file_with<F>(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        f: F,
    ) -> Result<u64>
    where
        F: FnOnce(&mut Writable<'_, W>) -> Result<()>,
    {
        let mut handle = self.write_stored_file(name, mtime_unix, unix_perms)?;
        let outcome = f(&mut handle);
        Self::finish_or_rollback(self, handle, outcome)
    }

    pub fn write_deflated_file_with<F>(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        f: F,
    ) -> Result<u64>
    where
        F: FnOnce(&mut Writable<'_, W>) -> Result<()>,
    {
        let mut handle = self.write_deflated_file(name, mtime_unix, unix_perms)?;
        let outcome = f(&mut handle);
        Self::finish_or_rollback(self, handle, outcome)
    }

    pub fn write_file_with<F>(
        &mut self,
        name: &str,
        mtime_unix: i64,
        unix_perms: Option<u32>,
        f: F,
    ) -> Result<u64>
    where
        F: FnOnce(&mut Writable<'_, W>) -> Result<()>,
    {
        let mut handle = self.write_file(name, mtime_unix, unix_perms)?;
        let outcome = f(&mut handle);
        Self::finish_or_rollback(self, handle, outcome)
    }

    fn finish_or_rollback(
        streamer: &mut Streamer<W>,
        mut handle: Writable<'_, W>,
        outcome: Result<()>,
    ) -> Result<u64> {
        match outcome {
            Ok(()) => match handle.finish() {
                Ok(offset) => Ok(offset),
                Err(e) => {
                    streamer.rollback()?;
                    Err(e)
                }
            },
            Err(e) => {
                handle.dispose_on_failure();
                drop(handle);
                streamer.rollback()?;
                Err(e)
            }
        }
    }

    /// Write the central directory and EOCD (with the Zip64 prologue if needed), and move to the
    /// terminal state. Does not close the underlying sink. Idempotent calls after the first
    /// return `OffsetOutOfSync`-shaped errors via `InvalidOutput` rather than re-running.
    pub fn close(&mut self) -> Result<u64> {
        if self.state == State::Closed {
            return Err(ZipError::InvalidOutput("already closed".into()));
        }
        self.require_idle()?;
        self.validate_previous_stored_entry_size(self.tell())?;

        let expected: u64 = self.slots.iter().map(|s| match s {
            Slot::Entry(e) => e.total_bytes_used(),
            Slot::Filler(f) => f.total_bytes_used,
        }).sum();
        let actual = self.tell();
        if expected != actual {
            return Err(ZipError::OffsetOutOfSync { entries_total: expected, sink_position: actual });
        }

        let cdir_start = actual;
        let live_entries: Vec<&EntryRecord> =
            self.slots.iter().filter_map(|s| match s { Slot::Entry(e) => Some(e), _ => None }).collect();

        let zip64_by_entry = live_entries.iter().any(|e| {
            e.uncompressed_size >= ZIP64_THRESHOLD
                || e.compressed_size >= ZIP64_THRESHOLD
                || e.local_header_offset >= ZIP64_THRESHOLD
        });
        let zip64_by_count = live_entries.len() as u64 > MAX_ENTRIES_BEFORE_ZIP64;
        // The disk-number-start quirk (§4.5) is decided from what's knowable before the central
        // directory itself is written; central-directory size overflowing 2^32 on its own is not
        // checked here (it would require a second pass), matching SPEC_FULL.md's documented
        // approximation for that one archive-wide trigger.
        let archive_is_zip64 = zip64_by_entry || zip64_by_count || cdir_start >= ZIP64_THRESHOLD;

        let mut cdir_size = 0u64;
        {
            let sink = self.sink.as_mut().unwrap();
            for e in &live_entries {
                let perms = e.unix_perms.unwrap_or(if e.is_directory { DEFAULT_DIR_PERMS } else { DEFAULT_FILE_PERMS });
                let header = CentralDirectoryFileHeader {
                    storage_mode: e.storage_mode,
                    use_data_descriptor: e.use_data_descriptor,
                    crc32: e.crc32,
                    compressed_size: e.compressed_size,
                    uncompressed_size: e.uncompressed_size,
                    mtime_unix: e.mtime_unix,
                    filename: &e.filename,
                    local_header_offset: e.local_header_offset,
                    unix_perms: perms,
                    is_directory: e.is_directory,
                    archive_is_zip64,
                };
                cdir_size += header.write_to(sink)?;
            }
            format::write_eocd(sink, live_entries.len() as u64, cdir_size, cdir_start)?;
        }

        self.state = State::Closed;
        log::debug!(
            "closed archive: {} entries, central directory {} bytes at offset {}",
            live_entries.len(),
            cdir_size,
            cdir_start
        );
        Ok(self.tell())
    }

    /// Recover the underlying sink. Only meaningful once no entry writer is open (in particular,
    /// after `close()`).
    pub fn into_sink(self) -> Result<W> {
        self.sink.map(CountingWriter::into_inner).ok_or_else(|| {
            ZipError::InvalidOutput("an entry writer still owns the sink".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_archive_is_22_bytes() {
        let mut s = Streamer::new(Vec::new());
        let offset = s.close().unwrap();
        assert_eq!(offset, 22);
        let buf = s.into_sink().unwrap();
        assert_eq!(buf.len(), 22);
        assert_eq!(&buf[0..4], &format::SIG_EOCD.to_le_bytes());
    }

    #[test]
    fn open_header_rejects_unknown_storage_mode() {
        let mut s = Streamer::new(Vec::new());
        let err = s.open_header("weird.bin", false, 0, None, 99, false, 0, 0, 0).unwrap_err();
        assert!(matches!(err, ZipError::UnknownMode(99)));
    }

    #[test]
    fn stored_entry_size_mismatch_without_simulate_write() {
        let mut s = Streamer::new(Vec::new());
        s.add_stored_entry("foo", 1024, 0xCC, 0, None, false).unwrap();
        let err = s.close().unwrap_err();
        match err {
            ZipError::EntryBodySizeMismatch { declared, actual } => {
                assert_eq!(declared, 1024);
                assert_eq!(actual, 0);
            }
            other => panic!("expected EntryBodySizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn offset_out_of_sync_without_simulate_write() {
        // Deflated entries with a declared size aren't covered by the narrower
        // EntryBodySizeMismatch check (that one's scoped to stored entries per spec §7), so a
        // missing simulate_write here still falls through to the archive-wide offset check.
        let mut s = Streamer::new(Vec::new());
        s.add_deflated_entry("foo", 512, 1024, 0xCC, 0, None, false).unwrap();
        let err = s.close().unwrap_err();
        match err {
            ZipError::OffsetOutOfSync { entries_total, sink_position } => {
                assert!(entries_total > sink_position);
            }
            other => panic!("expected OffsetOutOfSync, got {other:?}"),
        }
    }

    #[test]
    fn offset_stays_in_sync_with_simulate_write() {
        let mut s = Streamer::new(Vec::new());
        s.add_stored_entry("foo", 1024, 0xCC, 0, None, false).unwrap();
        s.simulate_write(1024).unwrap();
        assert!(s.close().is_ok());
    }

    #[test]
    fn rollback_excludes_entry_from_central_directory() {
        let mut s = Streamer::new(Vec::new());
        let err = s.write_deflated_file_with("deflated.txt", 0, None, |w| {
            w.write(b"this is attempt 1")?;
            Err(ZipError::InvalidOutput("simulated failure".into()))
        });
        assert!(err.is_err());

        let offset = s
            .write_deflated_file_with("deflated.txt", 0, None, |w| w.write(b"this is attempt 2"))
            .unwrap();
        assert!(offset > 0);
        s.close().unwrap();

        let buf = s.into_sink().unwrap();
        // exactly one occurrence of the local-file-header signature for "deflated.txt"
        let sig = format::SIG_LOCAL_FILE_HEADER.to_le_bytes();
        let count = buf.windows(4).filter(|w| *w == sig).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn failed_heuristic_write_as_first_entry_reports_original_error() {
        let mut s = Streamer::new(Vec::new());
        let err = s.write_file_with("only.txt", 0, None, |w| {
            w.write(b"small")?;
            Err(ZipError::InvalidOutput("simulated failure".into()))
        });
        match err {
            Err(ZipError::InvalidOutput(msg)) => assert_eq!(msg, "simulated failure"),
            other => panic!("expected the original error to surface, got {other:?}"),
        }
    }

    #[test]
    fn failed_heuristic_write_does_not_discard_prior_entry() {
        let mut s = Streamer::new(Vec::new());
        s.write_stored_file_with("first.txt", 0, None, |w| w.write(b"kept")).unwrap();

        let err = s.write_file_with("second.txt", 0, None, |w| {
            w.write(b"small, never crosses the threshold")?;
            Err(ZipError::InvalidOutput("simulated failure".into()))
        });
        assert!(err.is_err());

        s.close().unwrap();
        let buf = s.into_sink().unwrap();
        let sig = format::SIG_LOCAL_FILE_HEADER.to_le_bytes();
        let count = buf.windows(4).filter(|w| *w == sig).count();
        assert_eq!(count, 1, "the first entry must still be the only one in the archive");
    }

    #[test]
    fn cannot_open_second_entry_while_one_is_open() {
        let mut s = Streamer::new(Vec::new());
        let _handle = s.write_stored_file("a.txt", 0, None).unwrap();
        let err = s.write_stored_file("b.txt", 0, None).unwrap_err();
        assert!(matches!(err, ZipError::InvalidOutput(_)));
    }

    #[test]
    fn path_conflict_bubbles_up_from_add_file_path() {
        let mut s = Streamer::new(Vec::new());
        s.add_stored_entry("a/b", 0, 0, 0, None, false).unwrap();
        s.simulate_write(0).unwrap();
        let err = s.add_stored_entry("a/b/c", 0, 0, 0, None, false).unwrap_err();
        assert!(matches!(err, ZipError::PathConflict { .. }));
    }

    #[test]
    fn auto_rename_avoids_conflict() {
        let mut s = Streamer::with_options(Vec::new(), StreamerOptions { auto_rename_duplicate_filenames: true });
        s.add_stored_entry("x.txt", 0, 0, 0, None, false).unwrap();
        s.simulate_write(0).unwrap();
        s.add_stored_entry("x.txt", 0, 0, 0, None, false).unwrap();
        s.simulate_write(0).unwrap();
        s.close().unwrap();
        let buf = s.into_sink().unwrap();
        assert!(buf.windows(9).any(|w| w == b"x (1).txt"));
    }
}
