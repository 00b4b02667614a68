//! Two-pass archive writer (§4.7): reserve fixed-size records while their
//! final contents are still unknown, write section contents in order, then
//! patch the reservations once sizes, offsets, and digests are known.

use std::cell::RefCell;
use std::rc::Rc;

use crc32fast::Hasher;

use crate::archive::model::{
    Entry, EntryRecord, Group, Header, Section, SectionHeader, Stream, StreamRecord,
    FLAG_INTEGRITY_CHECKSUM_ENABLED, FORMAT_VERSION, INVALID_INDEX, MAGIC, STREAM_FLAG_HAS_CHECKSUM,
    STREAM_FLAG_SEEKABLE,
};
use crate::archive::{Archive, PendingStream};
use crate::buffer::{Buffer, OnDiskStruct, Reservation};
use crate::error::ArchiveError;
use crate::filter::chain::Env;
use crate::filter::observer::{ByteCounter, MultiDigest, ObserverSource, SharedObserver};
use crate::io::{FanIn, PassthroughPipe, Sink, Source};

/// Adapts a [`Buffer`] as a [`Sink`] so a [`PassthroughPipe`] can pump
/// filtered stream bytes directly into it.
struct BufferSink<'a> {
    buffer: &'a mut Buffer,
}

impl Sink for BufferSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.buffer.write(buf))
    }
}

fn shared<O>(observer: O) -> Rc<RefCell<O>> {
    Rc::new(RefCell::new(observer))
}

/// Unwraps a byte-counter/digester out of its shared cell. Only called once
/// the pipeline holding the other clone has been dropped, so this never
/// panics in practice.
fn unwrap_shared<O>(cell: Rc<RefCell<O>>) -> O {
    Rc::try_unwrap(cell)
        .unwrap_or_else(|_| panic!("observer still shared after its pipeline finished"))
        .into_inner()
}

pub fn write_archive(archive: &mut Archive, sink: &mut dyn Sink) -> Result<(), ArchiveError> {
    let mut pending_streams = std::mem::take(&mut archive.pending);

    let mut env = Env::new();
    for pending_stream in pending_streams.iter_mut() {
        pending_stream.filters.setup(&mut env);
        for pe in pending_stream.entries.iter_mut() {
            pe.filters.setup(&mut env);
        }
    }

    let mut entries = Vec::new();
    let mut streams = Vec::new();
    let mut entry_payloads = Vec::new();
    let mut stream_payloads = Vec::new();
    for (stream_idx, pending_stream) in pending_streams.iter().enumerate() {
        let mut entry_indices = Vec::with_capacity(pending_stream.entries.len());
        for (idx_in_stream, pe) in pending_stream.entries.iter().enumerate() {
            entry_indices.push(entries.len());
            entry_payloads.push(pe.filters.serialize());
            entries.push(Entry {
                name: pe.name.clone(),
                stream: Some(stream_idx),
                index_in_stream: Some(idx_in_stream),
                ..Entry::default()
            });
        }
        stream_payloads.push(pending_stream.filters.serialize());
        streams.push(Stream {
            entries: entry_indices,
            seekable: pending_stream.entries.len() <= 1,
            ..Stream::default()
        });
    }

    let entries_count = entries.len();
    let streams_count = streams.len();
    let entry_payload_present = entry_payloads.iter().any(|p| !p.is_empty());
    let stream_payload_present = stream_payloads.iter().any(|p| !p.is_empty());
    let groups_present = !archive.groups.is_empty();

    let mut sections = vec![Section::Header, Section::SectionTable];
    if entries_count > 0 {
        sections.push(Section::EntryTable);
    }
    if entry_payload_present {
        sections.push(Section::EntryPayload);
    }
    if streams_count > 0 {
        sections.push(Section::StreamTable);
    }
    if stream_payload_present {
        sections.push(Section::StreamPayload);
    }
    if streams_count > 0 {
        sections.push(Section::StreamData);
    }
    if entries_count > 0 {
        sections.push(Section::FileNameTable);
    }
    if groups_present {
        sections.push(Section::GroupTable);
    }

    let mut buf = Buffer::new();
    let header_handle = buf.reserve_for::<Header>();
    let section_table_offset = buf.position();
    let section_slots: Vec<Reservation<SectionHeader>> = (0..sections.len())
        .map(|_| buf.reserve_for::<SectionHeader>())
        .collect();
    let mut section_spans = vec![(0u64, 0u64); sections.len()];
    section_spans[0] = (0, Header::BYTE_LEN as u64);
    section_spans[1] = (
        section_table_offset,
        (sections.len() * SectionHeader::BYTE_LEN) as u64,
    );

    let mut entry_slots: Vec<Reservation<EntryRecord>> = Vec::new();
    let mut stream_slots: Vec<Reservation<StreamRecord>> = Vec::new();
    let mut entry_payload_spans = vec![(0u64, 0u32); entries_count];
    let mut stream_payload_spans = vec![(0u64, 0u32); streams_count];
    let mut entry_name_offsets = vec![0u64; entries_count];

    for (i, section) in sections.iter().enumerate() {
        match section {
            Section::Header | Section::SectionTable => continue,
            Section::EntryTable => {
                let start = buf.position();
                entry_slots = (0..entries_count)
                    .map(|_| buf.reserve_for::<EntryRecord>())
                    .collect();
                section_spans[i] = (start, buf.position() - start);
            }
            Section::EntryPayload => {
                let start = buf.position();
                for (idx, payload) in entry_payloads.iter().enumerate() {
                    if payload.is_empty() {
                        continue;
                    }
                    let offset = buf.position();
                    buf.write(payload);
                    entry_payload_spans[idx] = (offset, payload.len() as u32);
                }
                section_spans[i] = (start, buf.position() - start);
            }
            Section::StreamTable => {
                let start = buf.position();
                stream_slots = (0..streams_count)
                    .map(|_| buf.reserve_for::<StreamRecord>())
                    .collect();
                section_spans[i] = (start, buf.position() - start);
            }
            Section::StreamPayload => {
                let start = buf.position();
                for (idx, payload) in stream_payloads.iter().enumerate() {
                    if payload.is_empty() {
                        continue;
                    }
                    let offset = buf.position();
                    buf.write(payload);
                    stream_payload_spans[idx] = (offset, payload.len() as u32);
                }
                section_spans[i] = (start, buf.position() - start);
            }
            Section::StreamData => {
                let start = buf.position();
                for (stream_idx, pending_stream) in pending_streams.drain(..).enumerate() {
                    let entry_indices = streams[stream_idx].entries.clone();
                    write_stream(
                        pending_stream,
                        &entry_indices,
                        &mut entries,
                        &mut streams[stream_idx],
                        &mut buf,
                        archive.pack_options.stream_buffer_size,
                    )?;
                }
                section_spans[i] = (start, buf.position() - start);
            }
            Section::FileNameTable => {
                let start = buf.position();
                for (idx, entry) in entries.iter().enumerate() {
                    entry_name_offsets[idx] = buf.position();
                    buf.write(entry.name.as_bytes());
                    buf.write(&[0u8]);
                }
                section_spans[i] = (start, buf.position() - start);
            }
            Section::GroupTable => {
                let start = buf.position();
                for group in &archive.groups {
                    buf.write(&(group.indices.len() as u32).to_le_bytes());
                    for index in &group.indices {
                        buf.write(&index.to_le_bytes());
                    }
                    buf.write(group.name.as_bytes());
                    buf.write(&[0u8]);
                }
                section_spans[i] = (start, buf.position() - start);
            }
            Section::CommentsTable => unreachable!("comments table is never scheduled"),
        }
    }

    for (idx, handle) in entry_slots.into_iter().enumerate() {
        let e = &entries[idx];
        let (payload_offset, payload_length) = entry_payload_spans[idx];
        let record = EntryRecord {
            filtered_size: e.filtered_size,
            digest: e.digest,
            stream: e.stream.map(|s| s as i32).unwrap_or(INVALID_INDEX),
            index_in_stream: e.index_in_stream.map(|s| s as i32).unwrap_or(INVALID_INDEX),
            payload_offset,
            payload_length,
            entry_name_offset: entry_name_offsets[idx],
        };
        buf.write_through(handle, &record)?;
    }
    for (idx, handle) in stream_slots.into_iter().enumerate() {
        let s = &streams[idx];
        let (payload_offset, payload_length) = stream_payload_spans[idx];
        let mut flags = 0u64;
        if s.seekable {
            flags |= STREAM_FLAG_SEEKABLE;
        }
        if s.has_checksum {
            flags |= STREAM_FLAG_HAS_CHECKSUM;
        }
        let record = StreamRecord {
            flags,
            offset: s.offset,
            length: s.length,
            checksum: s.checksum,
            payload_offset,
            payload_length,
        };
        buf.write_through(handle, &record)?;
    }
    for (i, handle) in section_slots.iter().enumerate() {
        let (offset, size) = section_spans[i];
        let record = SectionHeader {
            offset,
            size,
            section_type: sections[i].to_u32(),
            count: section_record_count(sections[i], entries_count, streams_count, &archive.groups),
        };
        buf.write_through(*handle, &record)?;
    }

    let section_index = SectionHeader {
        offset: section_spans[1].0,
        size: section_spans[1].1,
        section_type: Section::SectionTable.to_u32(),
        count: sections.len() as u32,
    };
    let flags = if archive.integrity_checksum_enabled {
        FLAG_INTEGRITY_CHECKSUM_ENABLED
    } else {
        0
    };
    let mut header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
        flags,
        section_index,
        file_length: buf.len() as u64,
        file_checksum: 0,
    };
    buf.write_through(header_handle, &header)?;

    if archive.integrity_checksum_enabled {
        let mut hasher = Hasher::new();
        hasher.update(buf.as_slice());
        header.file_checksum = hasher.finalize();
        buf.write_through(header_handle, &header)?;
    }

    archive.entries = entries;
    archive.streams = streams;

    let bytes = buf.into_vec();
    sink.write(&bytes)?;
    sink.end()?;
    Ok(())
}

fn section_record_count(
    section: Section,
    entries_count: usize,
    streams_count: usize,
    groups: &[Group],
) -> u32 {
    match section {
        Section::Header => 1,
        Section::SectionTable => 0,
        Section::EntryTable | Section::EntryPayload | Section::FileNameTable => entries_count as u32,
        Section::StreamTable | Section::StreamPayload | Section::StreamData => streams_count as u32,
        Section::GroupTable => groups.len() as u32,
        Section::CommentsTable => 0,
    }
}

/// `write_stream` (§4.7): fans in each entry's `source -> counters ->
/// digester -> entry filter chain -> counter` pipeline, wraps the
/// concatenation with the stream's own filter chain and counters, and pumps
/// the result into `buf`. Snapshots each entry's compressed size at the
/// fan-in boundary and fills in the rest of `entries`/`stream` metadata once
/// the pipe has drained.
fn write_stream(
    mut pending_stream: PendingStream,
    entry_indices: &[usize],
    entries: &mut [Entry],
    stream: &mut Stream,
    buf: &mut Buffer,
    buffer_size: usize,
) -> Result<(), ArchiveError> {
    let compressed_counter = shared(ByteCounter::new());
    let mut per_entry_orig = Vec::with_capacity(entry_indices.len());
    let mut per_entry_filtered = Vec::with_capacity(entry_indices.len());
    let mut per_entry_digest = Vec::with_capacity(entry_indices.len());
    let mut child_sources: Vec<Box<dyn Source>> = Vec::with_capacity(entry_indices.len());

    for pe in pending_stream.entries.drain(..) {
        let orig_counter = shared(ByteCounter::new());
        let digester = shared(MultiDigest::new());
        let filtered_counter = shared(ByteCounter::new());

        let mut src: Box<dyn Source> = pe.source;
        src = Box::new(ObserverSource::new(src, SharedObserver::new(orig_counter.clone())));
        src = Box::new(ObserverSource::new(src, SharedObserver::new(digester.clone())));
        let mut filters = pe.filters;
        src = filters.apply(src)?;
        src = Box::new(ObserverSource::new(src, SharedObserver::new(filtered_counter.clone())));

        child_sources.push(src);
        per_entry_orig.push(orig_counter);
        per_entry_filtered.push(filtered_counter);
        per_entry_digest.push(digester);
    }

    let compressed_sizes = Rc::new(RefCell::new(vec![0u64; entry_indices.len()]));
    let snapshot_counter = compressed_counter.clone();
    let snapshot_sizes = compressed_sizes.clone();
    let fan_in = FanIn::new(child_sources, |_i| {}, move |i| {
        let mut counter = snapshot_counter.borrow_mut();
        snapshot_sizes.borrow_mut()[i] = counter.count();
        counter.reset();
    });

    let mut tail: Box<dyn Source> = Box::new(fan_in);
    tail = pending_stream.filters.apply(tail)?;
    tail = Box::new(ObserverSource::new(tail, SharedObserver::new(compressed_counter.clone())));
    let whole_counter = shared(ByteCounter::new());
    tail = Box::new(ObserverSource::new(tail, SharedObserver::new(whole_counter.clone())));

    let stream_offset = buf.position();
    {
        let mut sink = BufferSink { buffer: buf };
        let mut source = tail;
        PassthroughPipe::new(&mut *source, &mut sink, buffer_size).process()?;
    }

    // The fan-in's per-child callback snapshots `compressed_counter` as each
    // entry's source hits end-of-stream, but a buffered stream-level codec
    // (DEFLATE/LZMA) only flushes its trailer once the *whole* chain sees
    // end-of-stream, after the last snapshot already fired. Attribute that
    // trailing remainder to the last entry rather than let it go uncounted.
    let stream_length = unwrap_shared(whole_counter).count();
    let final_compressed_sizes = compressed_sizes.borrow().clone();
    let snapshotted_total: u64 = final_compressed_sizes.iter().sum();
    let remainder = stream_length.saturating_sub(snapshotted_total);
    let last = entry_indices.len().wrapping_sub(1);

    for (i, &entry_idx) in entry_indices.iter().enumerate() {
        let orig = std::mem::replace(&mut per_entry_orig[i], Rc::new(RefCell::new(ByteCounter::new())));
        entries[entry_idx].original_size = unwrap_shared(orig).count();
        let filtered = std::mem::replace(&mut per_entry_filtered[i], Rc::new(RefCell::new(ByteCounter::new())));
        entries[entry_idx].filtered_size = unwrap_shared(filtered).count();
        let digest = std::mem::replace(&mut per_entry_digest[i], Rc::new(RefCell::new(MultiDigest::new())));
        entries[entry_idx].digest = unwrap_shared(digest).finalize();
        entries[entry_idx].compressed_size = if i == last {
            final_compressed_sizes[i] + remainder
        } else {
            final_compressed_sizes[i]
        };
    }

    stream.offset = stream_offset;
    stream.length = stream_length;
    Ok(())
}
