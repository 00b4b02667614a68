//! Section-table-driven archive reader (§4.8): parses the header, section
//! table, and entry/stream/group records, then cross-references them per
//! the §3 invariants.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher;

use crate::archive::model::{
    EntryRecord, Group, Header, Section, SectionHeader, StreamRecord, FLAG_INTEGRITY_CHECKSUM_ENABLED,
    FORMAT_VERSION, INVALID_INDEX, MAGIC,
};
use crate::archive::{Archive, Entry, Stream};
use crate::buffer::OnDiskStruct;
use crate::error::ArchiveError;
use crate::io::{SeekableSource, Source, END_OF_STREAM};

fn read_at(
    source: &mut dyn SeekableSource,
    section_type: u32,
    offset: u64,
    len: usize,
    file_len: u64,
) -> Result<Vec<u8>, ArchiveError> {
    if offset.saturating_add(len as u64) > file_len {
        return Err(ArchiveError::TruncatedSection {
            section: section_type,
            offset,
            size: len as u64,
            file_len,
        });
    }
    source.seek_to(offset)?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = source.read(&mut buf[filled..])?;
        if n == END_OF_STREAM {
            return Err(ArchiveError::TruncatedSection {
                section: section_type,
                offset,
                size: len as u64,
                file_len,
            });
        }
        filled += n;
    }
    Ok(buf)
}

fn read_cstring(source: &mut dyn SeekableSource, offset: u64) -> Result<String, ArchiveError> {
    source.seek_to(offset)?;
    let mut out = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = source.read(&mut chunk)?;
        if n == END_OF_STREAM {
            break;
        }
        match chunk[..n].iter().position(|&b| b == 0) {
            Some(pos) => {
                out.extend_from_slice(&chunk[..pos]);
                break;
            }
            None => out.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8(out).map_err(|_| ArchiveError::CrossReference("entry name is not valid UTF-8".into()))
}

pub fn read_archive(source: &mut dyn SeekableSource) -> Result<Archive, ArchiveError> {
    let probe = read_at(source, Section::Header.to_u32(), 0, Header::BYTE_LEN, source.size())?;
    let header = Header::from_bytes(&probe);
    if header.magic != MAGIC {
        return Err(ArchiveError::InvalidMagic);
    }
    if header.version != FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedVersion(header.version));
    }
    let file_len = header.file_length;

    let table_bytes = read_at(
        source,
        Section::SectionTable.to_u32(),
        header.section_index.offset,
        header.section_index.count as usize * SectionHeader::BYTE_LEN,
        file_len,
    )?;
    let mut section_headers = Vec::with_capacity(header.section_index.count as usize);
    for chunk in table_bytes.chunks(SectionHeader::BYTE_LEN) {
        section_headers.push(SectionHeader::from_bytes(chunk));
    }

    let mut entries = Vec::new();
    let mut streams = Vec::new();
    let mut groups = Vec::new();

    for sh in &section_headers {
        let section = Section::from_u32(sh.section_type, sh.offset, sh.size, file_len)?;
        if sh.offset.saturating_add(sh.size) > file_len {
            return Err(ArchiveError::TruncatedSection {
                section: sh.section_type,
                offset: sh.offset,
                size: sh.size,
                file_len,
            });
        }
        match section {
            Section::Header | Section::SectionTable | Section::CommentsTable => {}
            Section::EntryTable => {
                let bytes = read_at(
                    source,
                    sh.section_type,
                    sh.offset,
                    sh.count as usize * EntryRecord::BYTE_LEN,
                    file_len,
                )?;
                for chunk in bytes.chunks(EntryRecord::BYTE_LEN) {
                    let record = EntryRecord::from_bytes(chunk);
                    if record.stream == INVALID_INDEX {
                        return Err(ArchiveError::CrossReference(
                            "entry has no stream assignment (stream == INVALID_INDEX)".into(),
                        ));
                    }
                    if record.index_in_stream < 0 {
                        return Err(ArchiveError::CrossReference(
                            "entry has a negative indexInStream".into(),
                        ));
                    }
                    let name = read_cstring(source, record.entry_name_offset)?;
                    let filter_payload = if record.payload_length > 0 {
                        Some(read_at(
                            source,
                            Section::EntryPayload.to_u32(),
                            record.payload_offset,
                            record.payload_length as usize,
                            file_len,
                        )?)
                    } else {
                        None
                    };
                    entries.push(Entry {
                        name,
                        original_size: 0,
                        filtered_size: record.filtered_size,
                        compressed_size: 0,
                        digest: record.digest,
                        stream: Some(record.stream as usize),
                        index_in_stream: Some(record.index_in_stream as usize),
                        filter_payload,
                    });
                }
            }
            Section::StreamTable => {
                let bytes = read_at(
                    source,
                    sh.section_type,
                    sh.offset,
                    sh.count as usize * StreamRecord::BYTE_LEN,
                    file_len,
                )?;
                for chunk in bytes.chunks(StreamRecord::BYTE_LEN) {
                    let record = StreamRecord::from_bytes(chunk);
                    let filter_payload = if record.payload_length > 0 {
                        Some(read_at(
                            source,
                            Section::StreamPayload.to_u32(),
                            record.payload_offset,
                            record.payload_length as usize,
                            file_len,
                        )?)
                    } else {
                        None
                    };
                    streams.push(Stream {
                        entries: Vec::new(),
                        seekable: record.flags & crate::archive::model::STREAM_FLAG_SEEKABLE != 0,
                        has_checksum: record.flags & crate::archive::model::STREAM_FLAG_HAS_CHECKSUM != 0,
                        offset: record.offset,
                        length: record.length,
                        checksum: record.checksum,
                        filter_payload,
                    });
                }
            }
            Section::EntryPayload | Section::StreamPayload | Section::StreamData | Section::FileNameTable => {}
            Section::GroupTable => {
                let bytes = read_at(source, sh.section_type, sh.offset, sh.size as usize, file_len)?;
                let mut cursor = Cursor::new(bytes.as_slice());
                for _ in 0..sh.count {
                    let count = cursor
                        .read_u32::<LittleEndian>()
                        .map_err(|_| truncated_group(sh, file_len))?;
                    let mut indices = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        indices.push(
                            cursor
                                .read_i32::<LittleEndian>()
                                .map_err(|_| truncated_group(sh, file_len))?,
                        );
                    }
                    let mut name_bytes = Vec::new();
                    let mut byte = [0u8; 1];
                    loop {
                        cursor
                            .read_exact(&mut byte)
                            .map_err(|_| truncated_group(sh, file_len))?;
                        if byte[0] == 0 {
                            break;
                        }
                        name_bytes.push(byte[0]);
                    }
                    let name = String::from_utf8(name_bytes)
                        .map_err(|_| ArchiveError::CrossReference("group name is not valid UTF-8".into()))?;
                    groups.push(Group { name, indices });
                }
            }
        }
    }

    let mut stream_slots: Vec<Vec<Option<usize>>> = vec![Vec::new(); streams.len()];
    for (entry_idx, entry) in entries.iter().enumerate() {
        let stream_idx = entry.stream.expect("validated above");
        let index_in_stream = entry.index_in_stream.expect("validated above");
        if stream_idx >= streams.len() {
            return Err(ArchiveError::CrossReference(format!(
                "entry {entry_idx} references out-of-range stream {stream_idx}"
            )));
        }
        let slots = &mut stream_slots[stream_idx];
        if index_in_stream >= slots.len() {
            slots.resize(index_in_stream + 1, None);
        }
        if slots[index_in_stream].is_some() {
            return Err(ArchiveError::CrossReference(format!(
                "duplicate entry at (stream {stream_idx}, indexInStream {index_in_stream})"
            )));
        }
        slots[index_in_stream] = Some(entry_idx);
    }
    for (stream_idx, slots) in stream_slots.into_iter().enumerate() {
        let mut resolved = Vec::with_capacity(slots.len());
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(entry_idx) => resolved.push(entry_idx),
                None => {
                    return Err(ArchiveError::CrossReference(format!(
                        "stream {stream_idx} is missing an entry at indexInStream {i}"
                    )))
                }
            }
        }
        streams[stream_idx].entries = resolved;
    }

    for (group_idx, group) in groups.iter().enumerate() {
        let mut seen = HashSet::new();
        for &index in &group.indices {
            if index < 0 || index as usize >= entries.len() {
                return Err(ArchiveError::CrossReference(format!(
                    "group {group_idx} references out-of-range entry index {index}"
                )));
            }
            if !seen.insert(index) {
                return Err(ArchiveError::CrossReference(format!(
                    "group {group_idx} has duplicate entry index {index}"
                )));
            }
        }
    }

    let integrity_checksum_enabled = header.flags & FLAG_INTEGRITY_CHECKSUM_ENABLED != 0;
    let integrity_checksum_valid = if integrity_checksum_enabled {
        Some(compute_checksum_matches(source, &header, file_len)?)
    } else {
        None
    };
    if integrity_checksum_valid == Some(false) {
        tracing::warn!("archive integrity checksum mismatch");
    }

    Ok(Archive {
        entries,
        streams,
        groups,
        integrity_checksum_enabled,
        integrity_checksum_valid,
        pending: Vec::new(),
    })
}

fn truncated_group(sh: &SectionHeader, file_len: u64) -> ArchiveError {
    ArchiveError::TruncatedSection {
        section: sh.section_type,
        offset: sh.offset,
        size: sh.size,
        file_len,
    }
}

/// Recomputes the whole-file CRC32 with the header's checksum field zeroed
/// and compares it to the stored value. Used both by [`read_archive`] (to
/// populate `integrity_checksum_valid` non-fatally) and by
/// [`crate::archive::Archive::verify_integrity`] (which surfaces a hard
/// [`ArchiveError::ChecksumMismatch`]).
fn compute_checksum_matches(
    source: &mut dyn SeekableSource,
    header: &Header,
    file_len: u64,
) -> Result<bool, ArchiveError> {
    let mut bytes = read_at(source, Section::Header.to_u32(), 0, file_len as usize, file_len)?;
    let checksum_field_offset = Header::BYTE_LEN - 4;
    bytes[checksum_field_offset..checksum_field_offset + 4].copy_from_slice(&0u32.to_le_bytes());
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize() == header.file_checksum)
}

/// Strict integrity check: re-reads the file and returns
/// [`ArchiveError::ChecksumMismatch`] if the stored CRC32 disagrees. Only
/// meaningful when the archive was written with the integrity flag set.
pub fn verify_integrity(source: &mut dyn SeekableSource) -> Result<(), ArchiveError> {
    let probe = read_at(source, Section::Header.to_u32(), 0, Header::BYTE_LEN, source.size())?;
    let header = Header::from_bytes(&probe);
    if header.flags & FLAG_INTEGRITY_CHECKSUM_ENABLED == 0 {
        return Ok(());
    }
    let file_len = header.file_length;
    if !compute_checksum_matches(source, &header, file_len)? {
        let mut bytes = read_at(source, Section::Header.to_u32(), 0, file_len as usize, file_len)?;
        let checksum_field_offset = Header::BYTE_LEN - 4;
        bytes[checksum_field_offset..checksum_field_offset + 4].copy_from_slice(&0u32.to_le_bytes());
        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        return Err(ArchiveError::ChecksumMismatch {
            expected: header.file_checksum,
            computed: hasher.finalize(),
        });
    }
    Ok(())
}
