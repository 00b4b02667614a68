//! # box — archival container with a composable filter pipeline
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every section is located through the section table; unknown section
//!   types are a hard read error, never silently skipped
//! - Entries and streams cross-reference each other by index; every
//!   invariant is checked during `read()`, not deferred to first access
//! - The filter pipeline (digests, counters, DEFLATE/LZMA, XOR, diff) is
//!   the same abstraction whether writing or reading: a `Source` wrapped
//!   by `Source`
//! - Random access to a single entry works even through a non-seekable
//!   stream, via skip-ahead over the inverted filter chain

pub mod archive;
pub mod buffer;
pub mod error;
pub mod filter;
pub mod io;

pub use archive::{Archive, ArchiveReadHandle, Entry, Group, PackOptions, Stream};
pub use error::{ArchiveError, BoxError, BufferError, FilterError};
pub use filter::chain::{DeflateBuilder, DiffBuilder, FilterBuilder, FilterChain, LzmaBuilder, XorBuilder};
pub use io::{MemorySink, MemorySource, SeekableSource, Sink, Source};
