//! Error types for every layer of the crate.
//!
//! Each layer gets its own `thiserror` enum; [`BoxError`] aggregates them so
//! the public API can return a single type.

use std::io;

use thiserror::Error;

/// Errors from the growable byte [`crate::buffer::Buffer`].
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("seek to negative offset (origin offset {origin}, delta {delta})")]
    NegativeSeek { origin: i64, delta: i64 },
    #[error("reservation of {requested} bytes does not match the {expected}-byte record it is writing through")]
    ReservationSizeMismatch { requested: usize, expected: usize },
}

/// Errors surfaced by filter stages (codec adapters, the chain, the registry).
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("{codec} codec error: {message}")]
    Codec { codec: &'static str, message: String },
    #[error("unknown filter identifier {0} during chain deserialization")]
    UnknownIdentifier(u32),
    #[error("filter-chain record claims {claimed} bytes but only {available} remain")]
    TruncatedRecord { claimed: u64, available: u64 },
    #[error("xdelta/diff filter requires a seekable reference source")]
    ReferenceNotSeekable,
    #[error("XOR filter record has a zero-length key")]
    EmptyXorKey,
    #[error("diff filter builder was deserialized but never given its reference source")]
    MissingReference,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while reading or writing an [`crate::archive::Archive`].
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid magic number: expected b\"box!\"")]
    InvalidMagic,
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),
    #[error("section {section:?} at offset {offset} size {size} extends past end of file ({file_len} bytes)")]
    TruncatedSection {
        section: u32,
        offset: u64,
        size: u64,
        file_len: u64,
    },
    #[error("cross-reference violation: {0}")]
    CrossReference(String),
    #[error("integrity checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Top-level error returned by the public API.
#[derive(Debug, Error)]
pub enum BoxError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = BoxError> = std::result::Result<T, E>;
