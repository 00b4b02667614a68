//! Random-access reads (§4.8): carve a single entry's bytes out of its
//! stream, inverting the stream- and (optionally) entry-level filter
//! chains, without decoding the rest of the archive.

use crate::archive::model::DigestInfo;
use crate::archive::Archive;
use crate::error::ArchiveError;
use crate::filter::chain::{Env, FilterChain};
use crate::filter::skip::SkipProcessor;
use crate::filter::BufferedFilterStage;
use crate::io::{OwnedMemorySource, SeekableSource, Source, END_OF_STREAM};

const BUFFER_SIZE: usize = 64 * 1024;

/// Wraps a borrowed `&mut dyn SeekableSource` as a plain, forward-only
/// [`Source`] once the caller has positioned it at the right offset.
struct TailSource<'a> {
    inner: &'a mut dyn SeekableSource,
}

impl Source for TailSource<'_> {
    fn read(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(dst)
    }
}

/// Produces a [`Source`] over one entry's decoded bytes, reconstructed from
/// the archive's stored metadata and the underlying archive bytes.
pub struct ArchiveReadHandle<'a> {
    source: &'a mut dyn SeekableSource,
    archive: &'a Archive,
}

impl<'a> ArchiveReadHandle<'a> {
    pub fn new(source: &'a mut dyn SeekableSource, archive: &'a Archive) -> Self {
        Self { source, archive }
    }

    /// Returns entry `entry_index`'s bytes. When `full` is `false`, only the
    /// stream-level filters are inverted (the entry's own filtered form);
    /// when `true`, the entry-level chain is inverted as well, yielding the
    /// entry's original bytes.
    pub fn source(&mut self, entry_index: usize, full: bool) -> Result<Box<dyn Source + '_>, ArchiveError> {
        let entry = self
            .archive
            .entries
            .get(entry_index)
            .ok_or_else(|| ArchiveError::CrossReference(format!("no such entry {entry_index}")))?;
        let stream_idx = entry
            .stream
            .ok_or_else(|| ArchiveError::CrossReference(format!("entry {entry_index} has no stream")))?;
        let stream = self
            .archive
            .streams
            .get(stream_idx)
            .ok_or_else(|| ArchiveError::CrossReference(format!("entry {entry_index} references out-of-range stream {stream_idx}")))?;

        let mut stream_chain = FilterChain::deserialize(stream.filter_payload.as_deref().unwrap_or(&[]))?;
        resolve_references(&mut stream_chain, self.source, self.archive)?;
        let mut entry_chain = if full {
            let mut chain = FilterChain::deserialize(entry.filter_payload.as_deref().unwrap_or(&[]))?;
            resolve_references(&mut chain, self.source, self.archive)?;
            Some(chain)
        } else {
            None
        };

        if stream.seekable {
            let preceding: u64 = stream
                .entries
                .iter()
                .take_while(|&&idx| idx != entry_index)
                .map(|&idx| self.archive.entries[idx].compressed_size)
                .sum();
            self.source.seek_to(stream.offset + preceding)?;

            let tail: Box<dyn Source> = Box::new(TailSource { inner: self.source });
            let bounded: Box<dyn Source> = Box::new(BufferedFilterStage::new(
                tail,
                SkipProcessor::new(0, entry.compressed_size),
                BUFFER_SIZE,
            ));
            let mut result = stream_chain.unapply(bounded)?;
            if let Some(chain) = entry_chain.as_mut() {
                result = chain.unapply(result)?;
            }
            Ok(result)
        } else {
            self.source.seek_to(stream.offset)?;
            let tail: Box<dyn Source> = Box::new(TailSource { inner: self.source });
            let bounded: Box<dyn Source> = Box::new(BufferedFilterStage::new(
                tail,
                SkipProcessor::new(0, stream.length),
                BUFFER_SIZE,
            ));
            let mut result = stream_chain.unapply(bounded)?;
            if let Some(chain) = entry_chain.as_mut() {
                result = chain.unapply(result)?;
            }

            let skip: u64 = stream
                .entries
                .iter()
                .take_while(|&&idx| idx != entry_index)
                .map(|&idx| {
                    let preceding = &self.archive.entries[idx];
                    if full {
                        preceding.original_size
                    } else {
                        preceding.filtered_size
                    }
                })
                .sum();
            let limit = if full { entry.original_size } else { entry.filtered_size };
            Ok(Box::new(BufferedFilterStage::new(result, SkipProcessor::new(skip, limit), BUFFER_SIZE)))
        }
    }
}

/// Resolves every builder in `chain` that asked for a reference, by finding
/// the archive entry whose digest matches and fully materializing it.
fn resolve_references(chain: &mut FilterChain, source: &mut dyn SeekableSource, archive: &Archive) -> Result<(), ArchiveError> {
    let mut env = Env::new();
    for builder in chain.builders_mut() {
        if let Some(digest) = builder.needs_reference_digest() {
            let reference_index = find_entry_by_digest(archive, digest)?;
            let bytes = materialize_entry(source, archive, reference_index)?;
            builder.provide_reference(Box::new(OwnedMemorySource::new(bytes)));
        }
    }
    chain.setup(&mut env);
    Ok(())
}

fn find_entry_by_digest(archive: &Archive, digest: DigestInfo) -> Result<usize, ArchiveError> {
    archive
        .entries
        .iter()
        .position(|e| e.digest == digest)
        .ok_or_else(|| ArchiveError::CrossReference("diff filter reference entry not found by digest".into()))
}

fn materialize_entry(source: &mut dyn SeekableSource, archive: &Archive, entry_index: usize) -> Result<Vec<u8>, ArchiveError> {
    let mut handle = ArchiveReadHandle::new(source, archive);
    let mut boxed = handle.source(entry_index, true)?;
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = boxed.read(&mut buf)?;
        if n == END_OF_STREAM {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    drop(boxed);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::model::{Entry, Stream};
    use crate::archive::writer::write_archive;
    use crate::archive::PendingEntry;
    use crate::archive::PendingStream;
    use crate::filter::chain::XorBuilder;
    use crate::io::{MemorySink, OwnedMemorySource, SeekableReadSource};
    use std::io::Cursor;

    fn build_archive(data: Vec<u8>) -> (Vec<u8>, Archive) {
        let filters = FilterChain::new(vec![Box::new(XorBuilder::new(b"k".to_vec()))]);
        let mut archive = Archive::of_single_entry("file.txt", Box::new(OwnedMemorySource::new(data)), filters);
        let mut sink = MemorySink::new();
        write_archive(&mut archive, &mut sink).unwrap();
        (sink.buf, archive)
    }

    fn drain(mut source: Box<dyn Source + '_>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn seekable_single_entry_round_trips() {
        let plain = b"random access payload, random access payload".to_vec();
        let (bytes, _) = build_archive(plain.clone());
        let mut cursor = SeekableReadSource::new(Cursor::new(bytes)).unwrap();
        let archive = Archive::read(&mut cursor).unwrap();
        assert_eq!(archive.entries.len(), 1);
        let mut handle = ArchiveReadHandle::new(&mut cursor, &archive);
        let out = drain(handle.source(0, true).unwrap());
        assert_eq!(out, plain);
    }

    #[test]
    fn unknown_entry_index_is_a_cross_reference_error() {
        let (bytes, _) = build_archive(b"x".to_vec());
        let mut cursor = SeekableReadSource::new(Cursor::new(bytes)).unwrap();
        let archive = Archive::read(&mut cursor).unwrap();
        let mut handle = ArchiveReadHandle::new(&mut cursor, &archive);
        assert!(matches!(handle.source(99, true), Err(ArchiveError::CrossReference(_))));
    }

    #[test]
    fn find_entry_by_digest_rejects_unmatched_digest() {
        let entry = Entry::default();
        let archive = Archive {
            entries: vec![entry],
            streams: vec![Stream::default()],
            ..Archive::default()
        };
        let missing = DigestInfo {
            crc32: 0xdead_beef,
            ..DigestInfo::default()
        };
        assert!(find_entry_by_digest(&archive, missing).is_err());
    }
}
