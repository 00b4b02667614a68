//! The archive container: on-disk records ([`model`]), the two-pass
//! writer, the section-table-driven reader, and random-access read
//! handles.

pub mod handle;
pub mod model;
pub mod reader;
pub mod writer;

pub use handle::ArchiveReadHandle;
pub use model::{Entry, Group, Stream};

use crate::error::ArchiveError;
use crate::filter::chain::{DeflateBuilder, FilterBuilder, FilterChain, LzmaBuilder};
use crate::io::{Sink, Source};

/// Buffer sizes and default codec parameters for building archives.
/// Mirrors the donor's `PackOptions`, narrowed to this crate's scope:
/// codec choice is a per-stream/per-entry filter chain rather than one
/// archive-wide default, and encryption beyond the XOR filter is a
/// non-goal, so those donor fields have no counterpart here.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub stream_buffer_size: usize,
    pub default_deflate_level: u32,
    pub default_lzma_preset: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            stream_buffer_size: 64 * 1024,
            default_deflate_level: 6,
            default_lzma_preset: 6,
        }
    }
}

impl PackOptions {
    /// A [`DeflateBuilder`] configured at `default_deflate_level`.
    pub fn deflate_builder(&self) -> Box<dyn FilterBuilder> {
        Box::new(DeflateBuilder::new(self.default_deflate_level))
    }

    /// An [`LzmaBuilder`] configured at `default_lzma_preset`.
    pub fn lzma_builder(&self) -> Box<dyn FilterBuilder> {
        Box::new(LzmaBuilder::new(self.default_lzma_preset))
    }
}

/// One entry not yet written: its name, data source, and per-entry filter
/// chain.
pub struct PendingEntry {
    pub name: String,
    pub source: Box<dyn Source>,
    pub filters: FilterChain,
}

impl PendingEntry {
    pub fn new(name: impl Into<String>, source: Box<dyn Source>, filters: FilterChain) -> Self {
        Self {
            name: name.into(),
            source,
            filters,
        }
    }
}

/// One stream not yet written: its ordered entries and the stream-level
/// filter chain applied to their concatenation.
pub struct PendingStream {
    pub entries: Vec<PendingEntry>,
    pub filters: FilterChain,
}

impl PendingStream {
    pub fn new(entries: Vec<PendingEntry>, filters: FilterChain) -> Self {
        Self { entries, filters }
    }
}

/// The archive model: entry/stream/group tables, plus (while building) the
/// not-yet-written streams a [`write`](Archive::write) call will consume.
#[derive(Default)]
pub struct Archive {
    pub entries: Vec<Entry>,
    pub streams: Vec<Stream>,
    pub groups: Vec<Group>,
    pub integrity_checksum_enabled: bool,
    /// `None` if the archive was never read with the flag set (or was built
    /// in-process and never written/read back); `Some` after [`Archive::read`]
    /// has recomputed the whole-file CRC32 against the stored value.
    pub integrity_checksum_valid: Option<bool>,
    pub pack_options: PackOptions,
    pending: Vec<PendingStream>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integrity_checksum(mut self, enabled: bool) -> Self {
        self.integrity_checksum_enabled = enabled;
        self
    }

    pub fn with_pack_options(mut self, options: PackOptions) -> Self {
        self.pack_options = options;
        self
    }

    pub fn add_group(&mut self, group: Group) {
        self.groups.push(group);
    }

    /// Factory for a one-entry, one-stream archive.
    pub fn of_single_entry(
        name: impl Into<String>,
        source: Box<dyn Source>,
        entry_filters: FilterChain,
    ) -> Self {
        let mut archive = Self::new();
        archive.pending.push(PendingStream::new(
            vec![PendingEntry::new(name, source, entry_filters)],
            FilterChain::new(Vec::new()),
        ));
        archive
    }

    /// Factory for one stream per `(name, source)` pair, all sharing the
    /// same stream-level filter chain shape (built fresh per stream via
    /// `stream_filters`, since a chain owns stateful codec handles).
    pub fn of_one_entry_per_stream(
        entries: Vec<(String, Box<dyn Source>)>,
        stream_filters: impl Fn() -> FilterChain,
    ) -> Self {
        let mut archive = Self::new();
        for (name, source) in entries {
            archive.pending.push(PendingStream::new(
                vec![PendingEntry::new(name, source, FilterChain::new(Vec::new()))],
                stream_filters(),
            ));
        }
        archive
    }

    /// General factory: an explicit, caller-built list of stream groupings.
    pub fn of_data(streams: Vec<PendingStream>) -> Self {
        let mut archive = Self::new();
        archive.pending = streams;
        archive
    }

    /// Runs the two-pass writer, filling `self.entries`/`self.streams` with
    /// the now-complete metadata and emitting bytes to `sink`.
    pub fn write(&mut self, sink: &mut dyn Sink) -> Result<(), ArchiveError> {
        writer::write_archive(self, sink)
    }

    /// Populates a fresh archive model from a seekable byte source.
    pub fn read(source: &mut dyn crate::io::SeekableSource) -> Result<Self, ArchiveError> {
        reader::read_archive(source)
    }

    /// `true` unless the archive was read with the integrity flag set and
    /// the stored CRC32 disagreed with a freshly computed one.
    pub fn is_valid_global_checksum(&self) -> bool {
        self.integrity_checksum_valid.unwrap_or(true)
    }

    /// Strict variant of the checksum recorded in [`Archive::is_valid_global_checksum`]:
    /// re-reads `source` and returns [`ArchiveError::ChecksumMismatch`] on
    /// disagreement instead of only flipping a flag.
    pub fn verify_integrity(source: &mut dyn crate::io::SeekableSource) -> Result<(), ArchiveError> {
        reader::verify_integrity(source)
    }
}
